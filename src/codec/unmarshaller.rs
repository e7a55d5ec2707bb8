//! Payload reader
//!
//! Walks the declaration tree the descriptor parser produced and pulls
//! bytes from the stream in declaration order. A variable is either fully
//! decoded or the whole load fails; no partially-filled value escapes.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt};

use crate::dataset::{DataType, ScalarValue, Sequence, Variable, VariableValue};

use super::{read_err, CodecError, CodecResult, END_OF_ROWS, MAX_STRING_BYTES, ROW_MARK};

/// Streaming decoder over any `Read` source.
pub struct Unmarshaller<R: Read> {
    input: R,
}

impl<R: Read> Unmarshaller<R> {
    pub fn new(input: R) -> Self {
        Self { input }
    }

    /// Decode the value for `variable` in place, using its declared shape
    /// as the template.
    ///
    /// Sequence cursors advance as rows are read, mirroring what a wire
    /// deserialize does; the caller resets them afterwards so a fresh
    /// serialize pass starts at row 0.
    pub fn get_variable(&mut self, variable: &mut Variable) -> CodecResult<()> {
        let filled = self.get_value(variable.value())?;
        *variable.value_mut() = filled;
        Ok(())
    }

    /// Decode one value described by `template`.
    fn get_value(&mut self, template: &VariableValue) -> CodecResult<VariableValue> {
        match template {
            VariableValue::Primitive(scalar) => Ok(VariableValue::Primitive(
                self.get_scalar(scalar.data_type())?,
            )),
            VariableValue::Array { element, shape, .. } => {
                let count: usize = shape.iter().product();
                let mut values = Vec::with_capacity(count);
                for _ in 0..count {
                    values.push(self.get_scalar(*element)?);
                }
                Ok(VariableValue::Array {
                    element: *element,
                    shape: shape.clone(),
                    values,
                })
            }
            VariableValue::Structure(members) => {
                let mut filled = Vec::with_capacity(members.len());
                for member in members {
                    let mut var = member.clone();
                    *var.value_mut() = self.get_value(member.value())?;
                    filled.push(var);
                }
                Ok(VariableValue::Structure(filled))
            }
            VariableValue::Sequence(seq) => {
                let mut out = Sequence::new(seq.template().to_vec(), Vec::new());
                loop {
                    match self.input.read_u8().map_err(read_err)? {
                        ROW_MARK => {
                            let mut row = Vec::with_capacity(seq.template().len());
                            for column in seq.template() {
                                row.push(self.get_value(column.value())?);
                            }
                            out.push_row(row);
                            out.advance_row();
                        }
                        END_OF_ROWS => break,
                        other => {
                            return Err(CodecError::Corrupt(format!(
                                "bad sequence row marker 0x{other:02X}"
                            )))
                        }
                    }
                }
                Ok(VariableValue::Sequence(out))
            }
        }
    }

    /// Decode one scalar of the given type.
    pub fn get_scalar(&mut self, ty: DataType) -> CodecResult<ScalarValue> {
        let scalar = match ty {
            DataType::Byte => ScalarValue::Byte(self.input.read_u8().map_err(read_err)?),
            DataType::Int16 => {
                ScalarValue::Int16(self.input.read_i16::<BigEndian>().map_err(read_err)?)
            }
            DataType::UInt16 => {
                ScalarValue::UInt16(self.input.read_u16::<BigEndian>().map_err(read_err)?)
            }
            DataType::Int32 => {
                ScalarValue::Int32(self.input.read_i32::<BigEndian>().map_err(read_err)?)
            }
            DataType::UInt32 => {
                ScalarValue::UInt32(self.input.read_u32::<BigEndian>().map_err(read_err)?)
            }
            DataType::Float32 => {
                ScalarValue::Float32(self.input.read_f32::<BigEndian>().map_err(read_err)?)
            }
            DataType::Float64 => {
                ScalarValue::Float64(self.input.read_f64::<BigEndian>().map_err(read_err)?)
            }
            DataType::Str | DataType::Url => {
                let s = self.get_string()?;
                if ty == DataType::Url {
                    ScalarValue::Url(s)
                } else {
                    ScalarValue::Str(s)
                }
            }
        };
        Ok(scalar)
    }

    fn get_string(&mut self) -> CodecResult<String> {
        let len = self.input.read_u32::<BigEndian>().map_err(read_err)?;
        if len > MAX_STRING_BYTES {
            return Err(CodecError::Corrupt(format!(
                "string length prefix {len} is implausible"
            )));
        }
        let mut bytes = vec![0u8; len as usize];
        self.input.read_exact(&mut bytes).map_err(read_err)?;
        String::from_utf8(bytes)
            .map_err(|_| CodecError::Corrupt("string payload is not UTF-8".to_string()))
    }
}
