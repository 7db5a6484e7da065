//! Reference codec for resolved layouts.
//!
//! Interprets a [`Meta`] directly, following the same wire rules as the
//! generated serializers. Used to check generated layouts and to decode
//! messages from the command line.

use std::error::Error;
use std::fmt;
use std::io::{self, Read, Write};
use std::string::FromUtf8Error;

use pretty::RcDoc;

use crate::layout::{Meta, Shape, Size, TagWidth, BUFFER_SIZE, COUNT_SIZE, PRESENCE_SIZE};
use crate::surface::{Arity, BaseType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Ptr(u64),
    Buffer { address: u64, len: u64, count: u64 },
    Optional(Option<Box<Value>>),
    Array(Vec<Value>),
    /// Field values of an object, in declaration order.
    Record(Vec<(String, Value)>),
    /// Index of an enum member.
    Enum(u64),
    /// Index of a union variant, and its payload.
    Union(u64, Box<Value>),
}

#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    InvalidTag { type_name: String, tag: u64 },
    InvalidString(FromUtf8Error),
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::Io(error) => error.fmt(f),
            ReadError::InvalidTag { type_name, tag } => {
                write!(f, "invalid value of {type_name}: tag {tag} is out of range")
            }
            ReadError::InvalidString(error) => write!(f, "invalid string: {error}"),
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::Io(error) => Some(error),
            ReadError::InvalidTag { .. } => None,
            ReadError::InvalidString(error) => Some(error),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> ReadError {
        ReadError::Io(error)
    }
}

impl From<FromUtf8Error> for ReadError {
    fn from(error: FromUtf8Error) -> ReadError {
        ReadError::InvalidString(error)
    }
}

#[derive(Debug)]
pub enum WriteError {
    Io(io::Error),
    /// The value does not have the shape of the type it is written as.
    TypeMismatch { type_name: String },
    /// A fixed length array was given the wrong number of elements.
    LengthMismatch { type_name: String, expected: u32, found: usize },
    InvalidTag { type_name: String, tag: u64 },
    /// A string or array too long for its count.
    TooLong { len: usize },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Io(error) => error.fmt(f),
            WriteError::TypeMismatch { type_name } => write!(f, "value is not a `{type_name}`"),
            WriteError::LengthMismatch {
                type_name,
                expected,
                found,
            } => write!(f, "expected {expected} elements in `{type_name}`, found {found}"),
            WriteError::InvalidTag { type_name, tag } => {
                write!(f, "invalid value of {type_name}: tag {tag} is out of range")
            }
            WriteError::TooLong { len } => write!(f, "length {len} does not fit in a count"),
        }
    }
}

impl Error for WriteError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WriteError::Io(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for WriteError {
    fn from(error: io::Error) -> WriteError {
        WriteError::Io(error)
    }
}

fn mismatch(meta: &Meta) -> WriteError {
    WriteError::TypeMismatch {
        type_name: meta.host_name.clone(),
    }
}

fn count(len: usize) -> Result<u32, WriteError> {
    u32::try_from(len).map_err(|_| WriteError::TooLong { len })
}

fn check_tag(meta: &Meta, tag: u64, len: usize) -> Result<(), WriteError> {
    match tag < len as u64 {
        true => Ok(()),
        false => Err(WriteError::InvalidTag {
            type_name: meta.host_name.clone(),
            tag,
        }),
    }
}

fn tag_width(meta: &Meta) -> TagWidth {
    meta.tag().unwrap_or(TagWidth::U8)
}

/// The number of bytes that `value` encodes to.
pub fn size(meta: &Meta, value: &Value) -> Result<u64, WriteError> {
    match (&meta.shape, value) {
        (Shape::Primitive(BaseType::Bool), Value::Bool(_)) => Ok(1),
        (Shape::Primitive(BaseType::Int), Value::Int(_))
        | (Shape::Primitive(BaseType::Uint), Value::Uint(_))
        | (Shape::Primitive(BaseType::Double), Value::Double(_))
        | (Shape::Primitive(BaseType::Ptr), Value::Ptr(_)) => Ok(8),
        (Shape::Primitive(BaseType::String), Value::String(string)) => {
            count(string.len())?;
            Ok(COUNT_SIZE + string.len() as u64)
        }
        (Shape::Primitive(BaseType::Buffer), Value::Buffer { .. }) => Ok(BUFFER_SIZE),
        (Shape::Optional(inner), Value::Optional(None)) => match inner.size {
            Size::Fixed(size) => Ok(PRESENCE_SIZE + size),
            Size::Dynamic => Ok(PRESENCE_SIZE),
        },
        (Shape::Optional(inner), Value::Optional(Some(value))) => {
            Ok(PRESENCE_SIZE + size(inner, value)?)
        }
        (Shape::Array(inner, arity), Value::Array(elems)) => {
            let header = match arity {
                Arity::Unbounded => {
                    count(elems.len())?;
                    COUNT_SIZE
                }
                Arity::Fixed(len) => {
                    check_length(meta, *len, elems.len())?;
                    0
                }
            };
            elems
                .iter()
                .try_fold(header, |total, elem| Ok(total + size(inner, elem)?))
        }
        (Shape::Object(fields), Value::Record(values)) => {
            check_fields(meta, values)?;
            fields
                .iter()
                .zip(values)
                .try_fold(0, |total, (field, (_, value))| Ok(total + size(&field.meta, value)?))
        }
        (Shape::Enum(members), Value::Enum(tag)) => {
            check_tag(meta, *tag, members.len())?;
            Ok(tag_width(meta).bytes())
        }
        (Shape::Union(variants), Value::Union(tag, value)) => {
            check_tag(meta, *tag, variants.len())?;
            let variant = &variants[*tag as usize];
            Ok(tag_width(meta).bytes() + size(&variant.meta, value)?)
        }
        (_, _) => Err(mismatch(meta)),
    }
}

fn check_length(meta: &Meta, expected: u32, found: usize) -> Result<(), WriteError> {
    match found == expected as usize {
        true => Ok(()),
        false => Err(WriteError::LengthMismatch {
            type_name: meta.host_name.clone(),
            expected,
            found,
        }),
    }
}

fn check_fields(meta: &Meta, values: &[(String, Value)]) -> Result<(), WriteError> {
    let fields = match &meta.shape {
        Shape::Object(fields) => fields,
        _ => return Err(mismatch(meta)),
    };
    let same_names = fields.len() == values.len()
        && (fields.iter().zip(values)).all(|(field, (name, _))| field.name == *name);

    match same_names {
        true => Ok(()),
        false => Err(mismatch(meta)),
    }
}

/// Encode `value` to `writer`.
pub fn write(meta: &Meta, value: &Value, writer: &mut dyn Write) -> Result<(), WriteError> {
    match (&meta.shape, value) {
        (Shape::Primitive(BaseType::Bool), Value::Bool(value)) => {
            writer.write_all(&[u8::from(*value)])?;
        }
        (Shape::Primitive(BaseType::Int), Value::Int(value)) => writer.write_all(&value.to_le_bytes())?,
        (Shape::Primitive(BaseType::Uint), Value::Uint(value))
        | (Shape::Primitive(BaseType::Ptr), Value::Ptr(value)) => writer.write_all(&value.to_le_bytes())?,
        (Shape::Primitive(BaseType::Double), Value::Double(value)) => {
            writer.write_all(&value.to_le_bytes())?;
        }
        (Shape::Primitive(BaseType::String), Value::String(string)) => {
            writer.write_all(&count(string.len())?.to_le_bytes())?;
            writer.write_all(string.as_bytes())?;
        }
        (Shape::Primitive(BaseType::Buffer), Value::Buffer { address, len, count }) => {
            writer.write_all(&address.to_le_bytes())?;
            writer.write_all(&len.to_le_bytes())?;
            writer.write_all(&count.to_le_bytes())?;
        }
        (Shape::Optional(inner), Value::Optional(None)) => {
            writer.write_all(&[0])?;
            // Absent fixed payloads are zero filled
            if let Size::Fixed(size) = inner.size {
                io::copy(&mut io::repeat(0).take(size), writer)?;
            }
        }
        (Shape::Optional(inner), Value::Optional(Some(value))) => {
            writer.write_all(&[1])?;
            write(inner, value, writer)?;
        }
        (Shape::Array(inner, arity), Value::Array(elems)) => {
            match arity {
                Arity::Unbounded => writer.write_all(&count(elems.len())?.to_le_bytes())?,
                Arity::Fixed(len) => check_length(meta, *len, elems.len())?,
            }
            for elem in elems {
                write(inner, elem, writer)?;
            }
        }
        (Shape::Object(fields), Value::Record(values)) => {
            check_fields(meta, values)?;
            for (field, (_, value)) in fields.iter().zip(values) {
                write(&field.meta, value, writer)?;
            }
        }
        (Shape::Enum(members), Value::Enum(tag)) => {
            check_tag(meta, *tag, members.len())?;
            write_tag(writer, tag_width(meta), *tag)?;
        }
        (Shape::Union(variants), Value::Union(tag, value)) => {
            check_tag(meta, *tag, variants.len())?;
            write_tag(writer, tag_width(meta), *tag)?;
            write(&variants[*tag as usize].meta, value, writer)?;
        }
        (_, _) => return Err(mismatch(meta)),
    }

    Ok(())
}

/// Decode a value from `reader`.
pub fn read(meta: &Meta, reader: &mut dyn Read) -> Result<Value, ReadError> {
    let value = match &meta.shape {
        Shape::Primitive(BaseType::Bool) => Value::Bool(read_u8(reader)? != 0),
        Shape::Primitive(BaseType::Int) => Value::Int(read_s64le(reader)?),
        Shape::Primitive(BaseType::Uint) => Value::Uint(read_u64le(reader)?),
        Shape::Primitive(BaseType::Double) => Value::Double(read_f64le(reader)?),
        Shape::Primitive(BaseType::Ptr) => Value::Ptr(read_u64le(reader)?),
        Shape::Primitive(BaseType::String) => {
            let len = u64::from(read_u32le(reader)?);
            let mut bytes = Vec::new();
            Read::take(&mut *reader, len).read_to_end(&mut bytes)?;
            if bytes.len() as u64 != len {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            Value::String(String::from_utf8(bytes)?)
        }
        Shape::Primitive(BaseType::Buffer) => Value::Buffer {
            address: read_u64le(reader)?,
            len: read_u64le(reader)?,
            count: read_u64le(reader)?,
        },
        Shape::Optional(inner) => match read_u8(reader)? {
            0 => {
                if let Size::Fixed(size) = inner.size {
                    let skipped = io::copy(&mut Read::take(&mut *reader, size), &mut io::sink())?;
                    if skipped != size {
                        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                    }
                }
                Value::Optional(None)
            }
            _ => Value::Optional(Some(Box::new(read(inner, reader)?))),
        },
        Shape::Array(inner, arity) => {
            let len = match arity {
                Arity::Unbounded => read_u32le(reader)?,
                Arity::Fixed(len) => *len,
            };
            let elems = (0..len)
                .map(|_| read(inner, reader))
                .collect::<Result<_, _>>()?;
            Value::Array(elems)
        }
        Shape::Object(fields) => {
            let values = fields
                .iter()
                .map(|field| Ok((field.name.clone(), read(&field.meta, reader)?)))
                .collect::<Result<_, ReadError>>()?;
            Value::Record(values)
        }
        Shape::Enum(members) => {
            let tag = read_tag(meta, reader, members.len())?;
            Value::Enum(tag)
        }
        Shape::Union(variants) => {
            let tag = read_tag(meta, reader, variants.len())?;
            let value = read(&variants[tag as usize].meta, reader)?;
            Value::Union(tag, Box::new(value))
        }
    };

    Ok(value)
}

fn read_tag(meta: &Meta, reader: &mut dyn Read, len: usize) -> Result<u64, ReadError> {
    let tag = match tag_width(meta) {
        TagWidth::U8 => u64::from(read_u8(reader)?),
        TagWidth::U16 => u64::from(read_u16le(reader)?),
        TagWidth::U32 => u64::from(read_u32le(reader)?),
        TagWidth::U64 => read_u64le(reader)?,
    };

    match tag < len as u64 {
        true => Ok(tag),
        false => Err(ReadError::InvalidTag {
            type_name: meta.host_name.clone(),
            tag,
        }),
    }
}

/// Write a tag that has already been checked against the member count.
fn write_tag(writer: &mut dyn Write, width: TagWidth, tag: u64) -> io::Result<()> {
    match width {
        TagWidth::U8 => writer.write_all(&(tag as u8).to_le_bytes()),
        TagWidth::U16 => writer.write_all(&(tag as u16).to_le_bytes()),
        TagWidth::U32 => writer.write_all(&(tag as u32).to_le_bytes()),
        TagWidth::U64 => writer.write_all(&tag.to_le_bytes()),
    }
}

fn read_u8(reader: &mut dyn Read) -> io::Result<u8> {
    let [byte] = read_array(reader)?;
    Ok(byte)
}

fn read_array<const N: usize>(reader: &mut dyn Read) -> io::Result<[u8; N]> {
    let mut buf = [0; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Generates a function that reads a multi-byte primitive.
macro_rules! read_multibyte_prim {
    ($read_multibyte_prim:ident, $from_bytes:ident, $T:ident) => {
        fn $read_multibyte_prim(reader: &mut dyn Read) -> io::Result<$T> {
            let data = read_array(reader)?;
            Ok($T::$from_bytes(data))
        }
    };
}

read_multibyte_prim!(read_u16le, from_le_bytes, u16);
read_multibyte_prim!(read_u32le, from_le_bytes, u32);
read_multibyte_prim!(read_u64le, from_le_bytes, u64);
read_multibyte_prim!(read_s64le, from_le_bytes, i64);
read_multibyte_prim!(read_f64le, from_le_bytes, f64);

const INDENT: isize = 4;

/// Render a decoded value of type `meta`.
pub fn doc<'a>(meta: &'a Meta, value: &'a Value) -> RcDoc<'a> {
    match (&meta.shape, value) {
        (_, Value::Bool(value)) => RcDoc::text(value.to_string()),
        (_, Value::Int(value)) => RcDoc::text(value.to_string()),
        (_, Value::Uint(value)) => RcDoc::text(value.to_string()),
        (_, Value::Double(value)) => RcDoc::text(format!("{value:?}")),
        (_, Value::String(value)) => RcDoc::text(format!("{value:?}")),
        (_, Value::Ptr(address)) => RcDoc::text(format!("{address:#x}")),
        (_, Value::Buffer { address, len, count }) => sequence(
            "buffer {",
            vec![
                RcDoc::text(format!("address: {address:#x}")),
                RcDoc::text(format!("len: {len}")),
                RcDoc::text(format!("count: {count:#x}")),
            ],
            "}",
            RcDoc::line(),
        ),
        (_, Value::Optional(None)) => RcDoc::text("null"),
        (Shape::Optional(inner), Value::Optional(Some(value))) => doc(inner, value),
        (Shape::Array(inner, _), Value::Array(elems)) => sequence(
            "[",
            elems.iter().map(|elem| doc(inner, elem)).collect(),
            "]",
            RcDoc::line_(),
        ),
        (Shape::Object(fields), Value::Record(values)) => RcDoc::text(meta.host_name.as_str())
            .append(RcDoc::space())
            .append(sequence(
                "{",
                (fields.iter().zip(values))
                    .map(|(field, (name, value))| {
                        RcDoc::text(name.as_str())
                            .append(RcDoc::text(":"))
                            .append(RcDoc::space())
                            .append(doc(&field.meta, value))
                    })
                    .collect(),
                "}",
                RcDoc::line(),
            )),
        (Shape::Enum(members), Value::Enum(tag)) => match members.get(*tag as usize) {
            Some(member) => RcDoc::text(format!("{:?}", member)),
            None => RcDoc::text(format!("<invalid tag {tag}>")),
        },
        (Shape::Union(variants), Value::Union(tag, value)) => match variants.get(*tag as usize) {
            Some(variant) => sequence(
                "{",
                vec![
                    RcDoc::text(format!("type: {}", variant.key)),
                    RcDoc::text("value:")
                        .append(RcDoc::space())
                        .append(doc(&variant.meta, value)),
                ],
                "}",
                RcDoc::line(),
            ),
            None => RcDoc::text(format!("<invalid tag {tag}>")),
        },
        (_, _) => RcDoc::text(format!("<not a {}>", meta.host_name)),
    }
}

fn sequence<'a>(open: &'a str, docs: Vec<RcDoc<'a>>, close: &'a str, padding: RcDoc<'a>) -> RcDoc<'a> {
    if docs.is_empty() {
        return RcDoc::text(open).append(RcDoc::text(close));
    }

    RcDoc::text(open)
        .append(
            padding
                .clone()
                .append(RcDoc::intersperse(docs, RcDoc::text(",").append(RcDoc::line())))
                .nest(INDENT),
        )
        .append(padding)
        .append(RcDoc::text(close))
        .group()
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::*;
    use crate::layout::Context;
    use crate::surface::Module;

    fn resolve(source: &str, name: &str) -> Rc<Meta> {
        let (module, messages) = Module::parse(source);
        assert!(messages.is_empty(), "{messages:?}");

        let mut context = Context::new(&module);
        context.resolve_definition(module.lookup(name).unwrap()).unwrap()
    }

    fn encode(meta: &Meta, value: &Value) -> Vec<u8> {
        let mut bytes = Vec::new();
        write(meta, value, &mut bytes).unwrap();
        assert_eq!(size(meta, value).unwrap(), bytes.len() as u64);
        bytes
    }

    fn decode(meta: &Meta, mut bytes: &[u8]) -> Value {
        let value = read(meta, &mut bytes).unwrap();
        assert!(bytes.is_empty(), "{} bytes left over", bytes.len());
        value
    }

    fn record(fields: &[(&str, Value)]) -> Value {
        Value::Record(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        )
    }

    #[test]
    fn point_round_trips() {
        let meta = resolve("type Point = { x: double, y: double }", "Point");
        let value = record(&[("x", Value::Double(1.5)), ("y", Value::Double(2.5))]);

        let bytes = encode(&meta, &value);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..8], &1.5_f64.to_le_bytes());
        assert_eq!(decode(&meta, &bytes), value);
    }

    #[test]
    fn color_is_one_byte() {
        let meta = resolve(r#"type Color = "red" | "green" | "blue""#, "Color");

        assert_eq!(encode(&meta, &Value::Enum(2)), [2]);
        assert_eq!(decode(&meta, &[1]), Value::Enum(1));

        let error = read(&meta, &mut &[3_u8][..]).unwrap_err();
        assert!(matches!(error, ReadError::InvalidTag { tag: 3, .. }));
    }

    #[test]
    fn list_payload_has_a_leading_count() {
        let meta = resolve("type List = int[]", "List");
        let payload = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

        let variant = match &meta.shape {
            Shape::Union(variants) => variants[0].meta.clone(),
            shape => panic!("expected a union, found {shape:?}"),
        };
        let bytes = encode(&variant, &payload);
        assert_eq!(bytes.len(), 4 + 3 * 8);
        assert_eq!(&bytes[..4], &[3, 0, 0, 0]);

        let value = Value::Union(0, Box::new(payload));
        let bytes = encode(&meta, &value);
        assert_eq!(bytes.len(), 1 + 4 + 3 * 8);
        assert_eq!(bytes[0], 0);
        assert_eq!(decode(&meta, &bytes), value);
    }

    #[test]
    fn fixed_sizes_do_not_depend_on_values() {
        let meta = resolve(
            "type A = { flag: bool, count: int?, pair: uint[2], tag: X (int | double) }",
            "A",
        );
        assert_eq!(meta.size, Size::Fixed(1 + 9 + 16 + 9));

        let present = record(&[
            ("flag", Value::Bool(true)),
            ("count", Value::Optional(Some(Box::new(Value::Int(-7))))),
            ("pair", Value::Array(vec![Value::Uint(1), Value::Uint(2)])),
            ("tag", Value::Union(1, Box::new(Value::Double(0.5)))),
        ]);
        let absent = record(&[
            ("flag", Value::Bool(false)),
            ("count", Value::Optional(None)),
            ("pair", Value::Array(vec![Value::Uint(0), Value::Uint(u64::MAX)])),
            ("tag", Value::Union(0, Box::new(Value::Int(3)))),
        ]);

        assert_eq!(encode(&meta, &present).len(), 35);
        let bytes = encode(&meta, &absent);
        assert_eq!(bytes.len(), 35);
        assert_eq!(&bytes[1..10], &[0; 9]);
        assert_eq!(decode(&meta, &bytes), absent);
    }

    #[test]
    fn dynamic_values() {
        let meta = resolve(
            "type Person = { name: string, nickname: string?, tags: string[], blob: buffer }",
            "Person",
        );
        let value = record(&[
            ("name", Value::String("Ada".to_owned())),
            ("nickname", Value::Optional(None)),
            (
                "tags",
                Value::Array(vec![Value::String("x".to_owned()), Value::String("".to_owned())]),
            ),
            (
                "blob",
                Value::Buffer {
                    address: 0x1000,
                    len: 5,
                    count: 0x2000,
                },
            ),
        ]);

        let bytes = encode(&meta, &value);
        assert_eq!(bytes.len(), (4 + 3) + 1 + (4 + (4 + 1) + 4) + 24);
        assert_eq!(decode(&meta, &bytes), value);
    }

    #[test]
    fn write_errors() {
        let meta = resolve("type A = { pair: int[2], e: E (\"a\" | \"b\") }", "A");

        let short = record(&[
            ("pair", Value::Array(vec![Value::Int(1)])),
            ("e", Value::Enum(0)),
        ]);
        assert!(matches!(
            write(&meta, &short, &mut Vec::new()),
            Err(WriteError::LengthMismatch { expected: 2, found: 1, .. }),
        ));

        let bad_tag = record(&[
            ("pair", Value::Array(vec![Value::Int(1), Value::Int(2)])),
            ("e", Value::Enum(2)),
        ]);
        assert!(matches!(
            size(&meta, &bad_tag),
            Err(WriteError::InvalidTag { tag: 2, .. }),
        ));

        let wrong_field = record(&[("pair", Value::Bool(true))]);
        assert!(matches!(
            write(&meta, &wrong_field, &mut Vec::new()),
            Err(WriteError::TypeMismatch { .. }),
        ));
    }

    #[test]
    fn truncated_input() {
        let meta = resolve("type S = { s: string }", "S");
        let error = read(&meta, &mut &[5_u8, 0, 0, 0, b'a'][..]).unwrap_err();
        assert!(matches!(error, ReadError::Io(error) if error.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn render() {
        let meta = resolve(
            r#"type Color = "red" | "green"
               type Point = { x: double, c: Color, tags: int[] }"#,
            "Point",
        );
        let value = record(&[
            ("x", Value::Double(1.0)),
            ("c", Value::Enum(1)),
            ("tags", Value::Array(vec![Value::Int(1), Value::Int(2)])),
        ]);

        assert_eq!(
            doc(&meta, &value).pretty(80).to_string(),
            r#"Point { x: 1.0, c: "green", tags: [1, 2] }"#,
        );
    }
}
