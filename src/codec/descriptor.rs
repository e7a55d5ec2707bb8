//! XML dataset descriptor
//!
//! The structural half of a cache entry: a small XML document declaring
//! the dataset's variables, their element types, and their shapes. Writer
//! and parser are symmetric; the parser yields a declaration tree with
//! empty values that the payload decoder fills in declaration order.
//!
//! ```text
//! <Dataset name="result">
//!     <Float64 name="mean"/>
//!     <Array name="grid" type="Int32">
//!         <dimension size="4"/>
//!     </Array>
//!     <Sequence name="rows">
//!         <Int32 name="t"/>
//!     </Sequence>
//! </Dataset>
//! ```

use std::io::{BufRead, Write};

use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::dataset::{DataType, Dataset, ScalarValue, Variable, VariableValue};

use super::{CodecError, CodecResult, DATA_MARK};

/// Write the descriptor for `dataset`.
///
/// With `constrained`, only variables whose send flag is set are
/// declared, matching the payload the marshaller will emit.
pub fn write_descriptor<W: Write>(
    out: W,
    dataset: &Dataset,
    constrained: bool,
) -> CodecResult<()> {
    let mut writer = Writer::new_with_indent(out, b' ', 4);

    let mut root = BytesStart::new("Dataset");
    root.push_attribute(("name", dataset.name()));
    writer.write_event(Event::Start(root))?;

    for var in dataset.variables() {
        if constrained && !var.send_p() {
            continue;
        }
        write_variable(&mut writer, var)?;
    }

    writer.write_event(Event::End(BytesEnd::new("Dataset")))?;
    Ok(())
}

fn write_variable<W: Write>(writer: &mut Writer<W>, var: &Variable) -> CodecResult<()> {
    match var.value() {
        VariableValue::Primitive(scalar) => {
            let mut e = BytesStart::new(scalar.data_type().as_str());
            e.push_attribute(("name", var.name()));
            writer.write_event(Event::Empty(e))?;
        }
        VariableValue::Array { element, shape, .. } => {
            let mut e = BytesStart::new("Array");
            e.push_attribute(("name", var.name()));
            e.push_attribute(("type", element.as_str()));
            writer.write_event(Event::Start(e))?;
            for dim in shape {
                let mut d = BytesStart::new("dimension");
                d.push_attribute(("size", dim.to_string().as_str()));
                writer.write_event(Event::Empty(d))?;
            }
            writer.write_event(Event::End(BytesEnd::new("Array")))?;
        }
        VariableValue::Structure(members) => {
            let mut e = BytesStart::new("Structure");
            e.push_attribute(("name", var.name()));
            writer.write_event(Event::Start(e))?;
            for member in members {
                write_variable(writer, member)?;
            }
            writer.write_event(Event::End(BytesEnd::new("Structure")))?;
        }
        VariableValue::Sequence(seq) => {
            let mut e = BytesStart::new("Sequence");
            e.push_attribute(("name", var.name()));
            writer.write_event(Event::Start(e))?;
            for column in seq.template() {
                write_variable(writer, column)?;
            }
            writer.write_event(Event::End(BytesEnd::new("Sequence")))?;
        }
    }
    Ok(())
}

/// Consume descriptor lines from `input` up to and including the
/// `--DATA:` delimiter line, then parse them.
///
/// On return the stream is positioned at the first payload byte. Running
/// out of input before the delimiter means the entry was truncated.
pub fn read_descriptor<R: BufRead>(input: &mut R) -> CodecResult<Dataset> {
    let mut xml = String::new();
    loop {
        let mut line = String::new();
        let n = input.read_line(&mut line)?;
        if n == 0 {
            return Err(CodecError::Corrupt(
                "descriptor ended before data delimiter".to_string(),
            ));
        }
        if line.trim_end_matches(['\r', '\n']) == DATA_MARK {
            break;
        }
        xml.push_str(&line);
    }
    parse_descriptor(&xml)
}

enum Frame {
    Dataset {
        name: String,
        variables: Vec<Variable>,
    },
    Structure {
        name: String,
        members: Vec<Variable>,
    },
    Sequence {
        name: String,
        template: Vec<Variable>,
    },
    Array {
        name: String,
        element: DataType,
        shape: Vec<usize>,
    },
}

/// Parse a descriptor document into a dataset of empty declarations.
pub fn parse_descriptor(xml: &str) -> CodecResult<Dataset> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut dataset: Option<Dataset> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "Dataset" => {
                        if !stack.is_empty() || dataset.is_some() {
                            return Err(CodecError::Corrupt(
                                "unexpected nested Dataset element".to_string(),
                            ));
                        }
                        stack.push(Frame::Dataset {
                            name: required_attr(&e, b"name")?,
                            variables: Vec::new(),
                        });
                    }
                    "Structure" => stack.push(Frame::Structure {
                        name: required_attr(&e, b"name")?,
                        members: Vec::new(),
                    }),
                    "Sequence" => stack.push(Frame::Sequence {
                        name: required_attr(&e, b"name")?,
                        template: Vec::new(),
                    }),
                    "Array" => {
                        let element = required_attr(&e, b"type")?;
                        let element = DataType::from_str(&element).ok_or_else(|| {
                            CodecError::Corrupt(format!("unknown array element type: {element}"))
                        })?;
                        stack.push(Frame::Array {
                            name: required_attr(&e, b"name")?,
                            element,
                            shape: Vec::new(),
                        });
                    }
                    // A primitive written as <Byte name="x"></Byte>; the
                    // matching end tag is ignored below.
                    other => attach(&mut stack, primitive_declaration(other, &e)?)?,
                }
            }
            Event::Empty(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "dimension" => {
                        let size = required_attr(&e, b"size")?;
                        let size: usize = size.parse().map_err(|_| {
                            CodecError::Corrupt(format!("bad dimension size: {size}"))
                        })?;
                        match stack.last_mut() {
                            Some(Frame::Array { shape, .. }) => shape.push(size),
                            _ => {
                                return Err(CodecError::Corrupt(
                                    "dimension outside an Array".to_string(),
                                ))
                            }
                        }
                    }
                    other => attach(&mut stack, primitive_declaration(other, &e)?)?,
                }
            }
            Event::End(e) => {
                let tag = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match tag.as_str() {
                    "Dataset" | "Structure" | "Sequence" | "Array" => {
                        let frame = stack.pop().ok_or_else(|| {
                            CodecError::Corrupt(format!("unmatched closing {tag}"))
                        })?;
                        match frame {
                            Frame::Dataset { name, variables } => {
                                let mut ds = Dataset::new(name);
                                for v in variables {
                                    ds.add_variable(v);
                                }
                                dataset = Some(ds);
                            }
                            Frame::Structure { name, members } => {
                                attach(&mut stack, Variable::structure(name, members))?
                            }
                            Frame::Sequence { name, template } => attach(
                                &mut stack,
                                Variable::sequence(name, template, Vec::new()),
                            )?,
                            Frame::Array {
                                name,
                                element,
                                shape,
                            } => attach(
                                &mut stack,
                                Variable::array(name, element, shape, Vec::new()),
                            )?,
                        }
                    }
                    _ => {} // closing tag of a non-empty primitive
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    dataset.ok_or_else(|| CodecError::Corrupt("descriptor has no Dataset element".to_string()))
}

fn primitive_declaration(tag: &str, e: &BytesStart<'_>) -> CodecResult<Variable> {
    let ty = DataType::from_str(tag)
        .ok_or_else(|| CodecError::Corrupt(format!("unknown descriptor element: {tag}")))?;
    Ok(Variable::primitive(
        required_attr(e, b"name")?,
        default_scalar(ty),
    ))
}

fn attach(stack: &mut [Frame], var: Variable) -> CodecResult<()> {
    match stack.last_mut() {
        Some(Frame::Dataset { variables, .. }) => variables.push(var),
        Some(Frame::Structure { members, .. }) => members.push(var),
        Some(Frame::Sequence { template, .. }) => template.push(var),
        Some(Frame::Array { .. }) => {
            return Err(CodecError::Corrupt(
                "variable declaration inside an Array".to_string(),
            ))
        }
        None => {
            return Err(CodecError::Corrupt(
                "variable declaration outside Dataset".to_string(),
            ))
        }
    }
    Ok(())
}

fn required_attr(e: &BytesStart<'_>, key: &[u8]) -> CodecResult<String> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|err| CodecError::Corrupt(format!("bad attribute: {err}")))?;
        if attr.key.as_ref() == key {
            return Ok(attr.unescape_value()?.to_string());
        }
    }
    Err(CodecError::Corrupt(format!(
        "missing {} attribute on {}",
        String::from_utf8_lossy(key),
        String::from_utf8_lossy(e.name().as_ref())
    )))
}

fn default_scalar(ty: DataType) -> ScalarValue {
    match ty {
        DataType::Byte => ScalarValue::Byte(0),
        DataType::Int16 => ScalarValue::Int16(0),
        DataType::UInt16 => ScalarValue::UInt16(0),
        DataType::Int32 => ScalarValue::Int32(0),
        DataType::UInt32 => ScalarValue::UInt32(0),
        DataType::Float32 => ScalarValue::Float32(0.0),
        DataType::Float64 => ScalarValue::Float64(0.0),
        DataType::Str => ScalarValue::Str(String::new()),
        DataType::Url => ScalarValue::Url(String::new()),
    }
}
