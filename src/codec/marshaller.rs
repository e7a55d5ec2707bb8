//! Payload writer
//!
//! Streams a dataset's variable values into a cache entry in the
//! canonical marshalled form. The writer emits no framing of its own
//! beyond the sequence row markers; everything else is implied by the
//! descriptor that precedes the payload.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::dataset::{ScalarValue, Variable, VariableValue};

use super::{CodecError, CodecResult, END_OF_ROWS, ROW_MARK};

/// Streaming encoder over any `Write` sink.
///
/// One stream is owned by one caller; separate marshallers over disjoint
/// streams are independent.
pub struct Marshaller<W: Write> {
    out: W,
}

impl<W: Write> Marshaller<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Hand the sink back (for flushing or closing by the caller).
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Encode one variable's value.
    pub fn put_variable(&mut self, variable: &Variable) -> CodecResult<()> {
        self.put_value(variable.value())
    }

    /// Encode a value: the visitor half of the codec's encode/decode pair.
    pub fn put_value(&mut self, value: &VariableValue) -> CodecResult<()> {
        match value {
            VariableValue::Primitive(scalar) => self.put_scalar(scalar),
            VariableValue::Array {
                element,
                shape,
                values,
            } => {
                let expected: usize = shape.iter().product();
                if values.len() != expected {
                    return Err(CodecError::Corrupt(format!(
                        "array has {} elements but shape implies {expected}",
                        values.len()
                    )));
                }
                for v in values {
                    if v.data_type() != *element {
                        return Err(CodecError::Corrupt(format!(
                            "array element type {:?} does not match declared {:?}",
                            v.data_type(),
                            element
                        )));
                    }
                    self.put_scalar(v)?;
                }
                Ok(())
            }
            VariableValue::Structure(members) => {
                for member in members {
                    self.put_value(member.value())?;
                }
                Ok(())
            }
            VariableValue::Sequence(seq) => {
                for row in seq.rows() {
                    self.out.write_u8(ROW_MARK)?;
                    for cell in row {
                        self.put_value(cell)?;
                    }
                }
                self.out.write_u8(END_OF_ROWS)?;
                Ok(())
            }
        }
    }

    /// Encode one scalar in its fixed big-endian form; strings are a u32
    /// byte-length prefix followed by UTF-8 bytes.
    pub fn put_scalar(&mut self, scalar: &ScalarValue) -> CodecResult<()> {
        match scalar {
            ScalarValue::Byte(v) => self.out.write_u8(*v)?,
            ScalarValue::Int16(v) => self.out.write_i16::<BigEndian>(*v)?,
            ScalarValue::UInt16(v) => self.out.write_u16::<BigEndian>(*v)?,
            ScalarValue::Int32(v) => self.out.write_i32::<BigEndian>(*v)?,
            ScalarValue::UInt32(v) => self.out.write_u32::<BigEndian>(*v)?,
            ScalarValue::Float32(v) => self.out.write_f32::<BigEndian>(*v)?,
            ScalarValue::Float64(v) => self.out.write_f64::<BigEndian>(*v)?,
            ScalarValue::Str(s) | ScalarValue::Url(s) => {
                let len = u32::try_from(s.len())
                    .map_err(|_| CodecError::Corrupt("string exceeds u32 length".to_string()))?;
                self.out.write_u32::<BigEndian>(len)?;
                self.out.write_all(s.as_bytes())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DataType;

    #[test]
    fn test_scalar_encodings_are_big_endian_fixed_size() {
        let mut buf = Vec::new();
        let mut m = Marshaller::new(&mut buf);
        m.put_scalar(&ScalarValue::UInt16(0x0102)).unwrap();
        m.put_scalar(&ScalarValue::Int32(-1)).unwrap();
        m.put_scalar(&ScalarValue::Str("ab".to_string())).unwrap();

        assert_eq!(
            buf,
            vec![
                0x01, 0x02, // u16
                0xFF, 0xFF, 0xFF, 0xFF, // i32 -1
                0x00, 0x00, 0x00, 0x02, b'a', b'b', // length-prefixed string
            ]
        );
    }

    #[test]
    fn test_array_shape_mismatch_rejected() {
        let var = Variable::array(
            "a",
            DataType::Byte,
            vec![3],
            vec![ScalarValue::Byte(1), ScalarValue::Byte(2)],
        );
        let mut buf = Vec::new();
        let err = Marshaller::new(&mut buf).put_variable(&var).unwrap_err();
        assert!(matches!(err, CodecError::Corrupt(_)));
    }

    #[test]
    fn test_empty_sequence_is_just_the_end_marker() {
        let var = Variable::sequence(
            "s",
            vec![Variable::primitive("x", ScalarValue::Int32(0))],
            Vec::new(),
        );
        let mut buf = Vec::new();
        Marshaller::new(&mut buf).put_variable(&var).unwrap();
        assert_eq!(buf, vec![END_OF_ROWS]);
    }
}
