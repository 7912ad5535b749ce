//! Tagged value codec over any `Read`/`Write` stream.
//!
//! Every value is a one-byte [`Tag`] followed by its payload. Lengths and
//! numbers use the [`WireFormat`] negotiated for the connection:
//!
//! ```text
//! Nil      [0]
//! Number   [1][width bytes]
//! Boolean  [2][0|1]
//! String   [3][u32 len][bytes]
//! Table    [4]{key value}*[5]
//! Blob     [6][String value][7]
//! Remote   [8][u32 len][dotted path]
//! ```
//!
//! Nothing here flushes; callers flush once per protocol step.

use std::io::{Read, Write};

use crate::command::Tag;
use crate::error::{Error, Result};
use crate::format::WireFormat;
use crate::value::{Number, Value};

/// Maximum accepted string, blob or path payload (16 MiB).
pub const MAX_STRING: u32 = 16 * 1024 * 1024;

/// Maximum table nesting depth.
pub const MAX_DEPTH: usize = 64;

/// Writes a single byte.
pub fn write_u8<W: Write + ?Sized>(w: &mut W, b: u8) -> Result<()> {
    w.write_all(&[b])?;
    Ok(())
}

/// Reads a single byte.
pub fn read_u8<R: Read + ?Sized>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Writes a `u32` in the negotiated byte order.
pub fn write_u32<W: Write + ?Sized>(w: &mut W, v: u32, fmt: WireFormat) -> Result<()> {
    w.write_all(&fmt.u32_bytes(v))?;
    Ok(())
}

/// Reads a `u32` in the negotiated byte order.
pub fn read_u32<R: Read + ?Sized>(r: &mut R, fmt: WireFormat) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(fmt.u32_from(buf))
}

/// Writes a bare number (no tag) in the negotiated representation.
pub fn write_number<W: Write + ?Sized>(w: &mut W, n: f64, fmt: WireFormat) -> Result<()> {
    let mut buf = [0u8; 8];
    w.write_all(fmt.number_bytes(n, &mut buf))?;
    Ok(())
}

/// Reads a bare number (no tag) in the negotiated representation.
pub fn read_number<R: Read + ?Sized>(r: &mut R, fmt: WireFormat) -> Result<Number> {
    let mut buf = [0u8; 8];
    let bytes = &mut buf[..usize::from(fmt.width())];
    r.read_exact(bytes)?;
    Ok(Number {
        value: fmt.number_from(bytes),
        kind: fmt.kind(),
    })
}

/// Writes a bare length-prefixed byte string (no tag).
pub fn write_string<W: Write + ?Sized>(w: &mut W, s: &[u8], fmt: WireFormat) -> Result<()> {
    let len = u32::try_from(s.len())
        .ok()
        .filter(|&n| n <= MAX_STRING)
        .ok_or_else(|| Error::protocol(format!("string of {} bytes exceeds 16 MiB", s.len())))?;
    write_u32(w, len, fmt)?;
    w.write_all(s)?;
    Ok(())
}

/// Reads a bare length-prefixed byte string (no tag).
pub fn read_string<R: Read + ?Sized>(r: &mut R, fmt: WireFormat) -> Result<Vec<u8>> {
    let len = read_u32(r, fmt)?;
    if len > MAX_STRING {
        return Err(Error::protocol(format!(
            "string of {len} bytes exceeds 16 MiB"
        )));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Encodes `value` with its tag.
pub fn encode<W: Write + ?Sized>(w: &mut W, value: &Value, fmt: WireFormat) -> Result<()> {
    encode_at(w, value, fmt, 0)
}

/// Encodes `value` nested `depth` tables deep.
fn encode_at<W: Write + ?Sized>(
    w: &mut W,
    value: &Value,
    fmt: WireFormat,
    depth: usize,
) -> Result<()> {
    match value {
        Value::Nil => write_u8(w, Tag::Nil.as_u8()),
        Value::Boolean(b) => {
            write_u8(w, Tag::Boolean.as_u8())?;
            write_u8(w, u8::from(*b))
        }
        Value::Number(n) => {
            write_u8(w, Tag::Number.as_u8())?;
            write_number(w, n.value, fmt)
        }
        Value::String(s) => {
            write_u8(w, Tag::String.as_u8())?;
            write_string(w, s, fmt)
        }
        Value::Table(pairs) => {
            if depth >= MAX_DEPTH {
                return Err(Error::protocol("table nesting exceeds 64 levels"));
            }
            write_u8(w, Tag::Table.as_u8())?;
            for (k, v) in pairs {
                encode_at(w, k, fmt, depth + 1)?;
                encode_at(w, v, fmt, depth + 1)?;
            }
            write_u8(w, Tag::TableEnd.as_u8())
        }
        Value::Blob(bytes) => {
            write_u8(w, Tag::Blob.as_u8())?;
            write_u8(w, Tag::String.as_u8())?;
            write_string(w, bytes, fmt)?;
            write_u8(w, Tag::BlobEnd.as_u8())
        }
        Value::Remote(path) => {
            write_u8(w, Tag::Remote.as_u8())?;
            write_string(w, path.as_bytes(), fmt)
        }
    }
}

/// Decodes one tagged value.
///
/// A stray end marker is a non-fatal protocol error; an unknown tag is
/// fatal since the rest of the stream can no longer be framed.
pub fn decode<R: Read + ?Sized>(r: &mut R, fmt: WireFormat) -> Result<Value> {
    match read_item(r, fmt, 0)? {
        Item::Value(v) => Ok(v),
        Item::End(tag) => Err(Error::protocol(format!("unexpected {tag:?} marker"))),
    }
}

/// A decoded value or a bare end marker.
enum Item {
    /// A complete value.
    Value(Value),
    /// `TableEnd` or `BlobEnd`.
    End(Tag),
}

/// Reads a tag and whatever follows it.
fn read_item<R: Read + ?Sized>(r: &mut R, fmt: WireFormat, depth: usize) -> Result<Item> {
    let byte = read_u8(r)?;
    let tag = Tag::from_u8(byte).ok_or(Error::UnknownTag(byte))?;
    let value = match tag {
        Tag::Nil => Value::Nil,
        Tag::Number => Value::Number(read_number(r, fmt)?),
        Tag::Boolean => Value::Boolean(read_u8(r)? != 0),
        Tag::String => Value::String(read_string(r, fmt)?),
        Tag::Table => read_table(r, fmt, depth)?,
        Tag::Blob => read_blob(r, fmt)?,
        Tag::Remote => {
            let path = String::from_utf8(read_string(r, fmt)?)
                .map_err(|_| Error::protocol("remote path is not UTF-8"))?;
            Value::Remote(path)
        }
        Tag::TableEnd | Tag::BlobEnd => return Ok(Item::End(tag)),
    };
    Ok(Item::Value(value))
}

/// Reads table pairs up to the `TableEnd` in key position.
fn read_table<R: Read + ?Sized>(r: &mut R, fmt: WireFormat, depth: usize) -> Result<Value> {
    if depth >= MAX_DEPTH {
        return Err(Error::protocol("table nesting exceeds 64 levels"));
    }
    let mut pairs = Vec::new();
    loop {
        let key = match read_item(r, fmt, depth + 1)? {
            Item::Value(k) => k,
            Item::End(Tag::TableEnd) => return Ok(Value::Table(pairs)),
            Item::End(tag) => {
                return Err(Error::protocol(format!("unexpected {tag:?} inside table")));
            }
        };
        let Item::Value(value) = read_item(r, fmt, depth + 1)? else {
            return Err(Error::protocol("table key without a value"));
        };
        pairs.push((key, value));
    }
}

/// Reads the string payload and closing tag of a blob.
fn read_blob<R: Read + ?Sized>(r: &mut R, fmt: WireFormat) -> Result<Value> {
    let byte = read_u8(r)?;
    if byte != Tag::String.as_u8() {
        return Err(Error::protocol(format!(
            "blob payload must be a string, got tag {byte}"
        )));
    }
    let bytes = read_string(r, fmt)?;
    let end = read_u8(r)?;
    if end != Tag::BlobEnd.as_u8() {
        return Err(Error::protocol(format!("blob not terminated, got tag {end}")));
    }
    Ok(Value::Blob(bytes))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::format::NumberKind;

    fn roundtrip(v: &Value, fmt: WireFormat) -> Value {
        let mut buf = Vec::new();
        encode(&mut buf, v, fmt).unwrap();
        let mut cursor = Cursor::new(&buf);
        let out = decode(&mut cursor, fmt).unwrap();
        assert_eq!(cursor.position() as usize, buf.len(), "trailing bytes");
        out
    }

    #[test]
    fn roundtrip_scalars_and_nested_tables() {
        let fmt = WireFormat::default();
        let v = Value::table([
            (Value::from("name"), Value::from("lrpc")),
            (Value::from("on"), Value::from(true)),
            (Value::from("pi"), Value::float(3.25)),
            (Value::from(1), Value::Nil),
            (
                Value::from("inner"),
                Value::list([Value::from("x"), Value::table([("deep", false)])]),
            ),
        ]);
        assert_eq!(roundtrip(&v, fmt), v);
    }

    #[test]
    fn table_duplicates_survive_in_order() {
        let fmt = WireFormat::default();
        let v = Value::Table(vec![
            (Value::from("a"), Value::from(1.0)),
            (Value::from("a"), Value::from(2.0)),
        ]);
        assert_eq!(roundtrip(&v, fmt), v);
    }

    #[test]
    fn integer_wire_format_changes_kind() {
        let fmt = WireFormat::new(false, 4, NumberKind::Integer).unwrap();
        let mut buf = Vec::new();
        encode(&mut buf, &Value::float(42.7), fmt).unwrap();
        assert_eq!(buf, [1, 0, 0, 0, 42]);
        assert_eq!(decode(&mut Cursor::new(&buf), fmt).unwrap(), Value::integer(42));
    }

    #[test]
    fn string_layout_uses_negotiated_order() {
        let be = WireFormat::new(false, 8, NumberKind::Float).unwrap();
        let mut buf = Vec::new();
        encode(&mut buf, &Value::from("hi"), be).unwrap();
        assert_eq!(buf, [3, 0, 0, 0, 2, b'h', b'i']);
    }

    #[test]
    fn blob_is_wrapped_and_byte_exact() {
        let fmt = WireFormat::default();
        let bytes: Vec<u8> = (0..=255).collect();
        let mut buf = Vec::new();
        encode(&mut buf, &Value::Blob(bytes.clone()), fmt).unwrap();
        assert_eq!(buf[0], Tag::Blob.as_u8());
        assert_eq!(buf[1], Tag::String.as_u8());
        assert_eq!(*buf.last().unwrap(), Tag::BlobEnd.as_u8());
        assert_eq!(decode(&mut Cursor::new(&buf), fmt).unwrap(), Value::Blob(bytes));
    }

    #[test]
    fn remote_roundtrip() {
        let fmt = WireFormat::default();
        let v = Value::Remote("math.max".into());
        assert_eq!(roundtrip(&v, fmt), v);
    }

    #[test]
    fn table_stops_at_end_marker() {
        let fmt = WireFormat::default();
        // {true = nil} followed by an unrelated byte.
        let buf = [4, 2, 1, 0, 5, 0xAA];
        let mut cursor = Cursor::new(&buf[..]);
        let v = decode(&mut cursor, fmt).unwrap();
        assert_eq!(v, Value::Table(vec![(Value::Boolean(true), Value::Nil)]));
        assert_eq!(cursor.position(), 5);
    }

    #[test]
    fn stray_end_markers_are_protocol_errors() {
        let fmt = WireFormat::default();
        let err = decode(&mut Cursor::new(&[5u8][..]), fmt).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        // End marker in value position.
        let err = decode(&mut Cursor::new(&[4u8, 0, 5][..]), fmt).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn unknown_tag_is_fatal() {
        let err = decode(&mut Cursor::new(&[42u8][..]), WireFormat::default()).unwrap_err();
        assert!(matches!(err, Error::UnknownTag(42)));
        assert!(err.is_fatal());
    }

    #[test]
    fn truncated_input_is_eof() {
        let err = decode(&mut Cursor::new(&[3u8, 9, 0][..]), WireFormat::default()).unwrap_err();
        assert!(matches!(err, Error::Eof));
    }

    #[test]
    fn rejects_oversized_string() {
        let be = WireFormat::new(false, 8, NumberKind::Float).unwrap();
        let mut buf = vec![3u8];
        buf.extend_from_slice(&(32u32 * 1024 * 1024).to_be_bytes());
        let err = decode(&mut Cursor::new(&buf), be).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn rejects_deep_nesting() {
        let mut v = Value::Nil;
        for _ in 0..=MAX_DEPTH {
            v = Value::list([v]);
        }
        let mut buf = Vec::new();
        assert!(encode(&mut buf, &v, WireFormat::default()).is_err());

        let mut wire = vec![4u8; MAX_DEPTH + 1];
        wire.push(5);
        let err = decode(&mut Cursor::new(&wire), WireFormat::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
