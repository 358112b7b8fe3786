//! AMQP field tables: an ordered sequence of (shortstr name, tagged value).

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FieldTableError {
    #[error("field table truncated")]
    Truncated,
    #[error("unknown field value tag {0:#x}")]
    UnknownTag(u8),
}

/// A single AMQP field value. The tag characters in variant doc comments
/// match the wire tag byte used to discriminate this type.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `t`
    Bool(bool),
    /// `b`
    I8(i8),
    /// `B`
    U8(u8),
    /// `U`
    I16(i16),
    /// `u`
    U16(u16),
    /// `I`
    I32(i32),
    /// `i`
    U32(u32),
    /// `L`
    I64(i64),
    /// `l`
    U64(u64),
    /// `f`
    F32(f32),
    /// `d`
    F64(f64),
    /// `S`
    LongStr(String),
    /// `s`
    ShortStr(String),
    /// `A`
    Array(Vec<FieldValue>),
    /// `T`
    Timestamp(u64),
    /// `F`
    Table(Vec<(String, FieldValue)>),
    /// `V`
    Void,
    /// `x`
    ByteArray(Vec<u8>),
}

fn read_shortstr(buf: &mut &[u8]) -> Result<String, FieldTableError> {
    if buf.is_empty() {
        return Err(FieldTableError::Truncated);
    }
    let len = buf[0] as usize;
    if buf.len() < 1 + len {
        return Err(FieldTableError::Truncated);
    }
    let s = String::from_utf8_lossy(&buf[1..1 + len]).into_owned();
    buf.advance(1 + len);
    Ok(s)
}

fn write_shortstr(out: &mut BytesMut, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    out.put_u8(len as u8);
    out.put_slice(&bytes[..len]);
}

fn read_longstr(buf: &mut &[u8]) -> Result<String, FieldTableError> {
    if buf.len() < 4 {
        return Err(FieldTableError::Truncated);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    buf.advance(4);
    if buf.len() < len {
        return Err(FieldTableError::Truncated);
    }
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Ok(s)
}

fn write_longstr(out: &mut BytesMut, s: &str) {
    out.put_u32(s.len() as u32);
    out.put_slice(s.as_bytes());
}

fn read_value(buf: &mut &[u8]) -> Result<FieldValue, FieldTableError> {
    if buf.is_empty() {
        return Err(FieldTableError::Truncated);
    }
    let tag = buf[0];
    buf.advance(1);
    macro_rules! need {
        ($n:expr) => {
            if buf.len() < $n {
                return Err(FieldTableError::Truncated);
            }
        };
    }
    match tag {
        b't' => {
            need!(1);
            let v = buf[0] != 0;
            buf.advance(1);
            Ok(FieldValue::Bool(v))
        }
        b'b' => {
            need!(1);
            let v = buf[0] as i8;
            buf.advance(1);
            Ok(FieldValue::I8(v))
        }
        b'B' => {
            need!(1);
            let v = buf[0];
            buf.advance(1);
            Ok(FieldValue::U8(v))
        }
        b'U' => {
            need!(2);
            let v = i16::from_be_bytes([buf[0], buf[1]]);
            buf.advance(2);
            Ok(FieldValue::I16(v))
        }
        b'u' => {
            need!(2);
            let v = u16::from_be_bytes([buf[0], buf[1]]);
            buf.advance(2);
            Ok(FieldValue::U16(v))
        }
        b'I' => {
            need!(4);
            let v = i32::from_be_bytes(buf[0..4].try_into().unwrap());
            buf.advance(4);
            Ok(FieldValue::I32(v))
        }
        b'i' => {
            need!(4);
            let v = u32::from_be_bytes(buf[0..4].try_into().unwrap());
            buf.advance(4);
            Ok(FieldValue::U32(v))
        }
        b'L' => {
            need!(8);
            let v = i64::from_be_bytes(buf[0..8].try_into().unwrap());
            buf.advance(8);
            Ok(FieldValue::I64(v))
        }
        b'l' => {
            need!(8);
            let v = u64::from_be_bytes(buf[0..8].try_into().unwrap());
            buf.advance(8);
            Ok(FieldValue::U64(v))
        }
        b'f' => {
            need!(4);
            let v = f32::from_be_bytes(buf[0..4].try_into().unwrap());
            buf.advance(4);
            Ok(FieldValue::F32(v))
        }
        b'd' => {
            need!(8);
            let v = f64::from_be_bytes(buf[0..8].try_into().unwrap());
            buf.advance(8);
            Ok(FieldValue::F64(v))
        }
        b'S' => Ok(FieldValue::LongStr(read_longstr(buf)?)),
        b's' => Ok(FieldValue::ShortStr(read_shortstr(buf)?)),
        b'T' => {
            need!(8);
            let v = u64::from_be_bytes(buf[0..8].try_into().unwrap());
            buf.advance(8);
            Ok(FieldValue::Timestamp(v))
        }
        b'V' => Ok(FieldValue::Void),
        b'x' => {
            need!(4);
            let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
            buf.advance(4);
            need!(len);
            let v = buf[..len].to_vec();
            buf.advance(len);
            Ok(FieldValue::ByteArray(v))
        }
        b'A' => {
            need!(4);
            let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
            buf.advance(4);
            need!(len);
            let mut inner = &buf[..len];
            let mut items = Vec::new();
            while !inner.is_empty() {
                items.push(read_value(&mut inner)?);
            }
            buf.advance(len);
            Ok(FieldValue::Array(items))
        }
        b'F' => {
            need!(4);
            let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
            buf.advance(4);
            need!(len);
            let inner = &buf[..len];
            let table = decode(inner)?;
            buf.advance(len);
            Ok(FieldValue::Table(table))
        }
        other => Err(FieldTableError::UnknownTag(other)),
    }
}

fn write_value(out: &mut BytesMut, value: &FieldValue) {
    match value {
        FieldValue::Bool(v) => {
            out.put_u8(b't');
            out.put_u8(*v as u8);
        }
        FieldValue::I8(v) => {
            out.put_u8(b'b');
            out.put_i8(*v);
        }
        FieldValue::U8(v) => {
            out.put_u8(b'B');
            out.put_u8(*v);
        }
        FieldValue::I16(v) => {
            out.put_u8(b'U');
            out.put_i16(*v);
        }
        FieldValue::U16(v) => {
            out.put_u8(b'u');
            out.put_u16(*v);
        }
        FieldValue::I32(v) => {
            out.put_u8(b'I');
            out.put_i32(*v);
        }
        FieldValue::U32(v) => {
            out.put_u8(b'i');
            out.put_u32(*v);
        }
        FieldValue::I64(v) => {
            out.put_u8(b'L');
            out.put_i64(*v);
        }
        FieldValue::U64(v) => {
            out.put_u8(b'l');
            out.put_u64(*v);
        }
        FieldValue::F32(v) => {
            out.put_u8(b'f');
            out.put_f32(*v);
        }
        FieldValue::F64(v) => {
            out.put_u8(b'd');
            out.put_f64(*v);
        }
        FieldValue::LongStr(s) => {
            out.put_u8(b'S');
            write_longstr(out, s);
        }
        FieldValue::ShortStr(s) => {
            out.put_u8(b's');
            write_shortstr(out, s);
        }
        FieldValue::Timestamp(v) => {
            out.put_u8(b'T');
            out.put_u64(*v);
        }
        FieldValue::Void => {
            out.put_u8(b'V');
        }
        FieldValue::ByteArray(v) => {
            out.put_u8(b'x');
            out.put_u32(v.len() as u32);
            out.put_slice(v);
        }
        FieldValue::Array(items) => {
            out.put_u8(b'A');
            let mut inner = BytesMut::new();
            for item in items {
                write_value(&mut inner, item);
            }
            out.put_u32(inner.len() as u32);
            out.put_slice(&inner);
        }
        FieldValue::Table(table) => {
            out.put_u8(b'F');
            let inner = encode(table);
            out.put_u32(inner.len() as u32);
            out.put_slice(&inner);
        }
    }
}

/// Decode a complete field table (no outer length prefix — callers that
/// read a `longstr`-framed nested table slice it out first).
pub fn decode(mut buf: &[u8]) -> Result<Vec<(String, FieldValue)>, FieldTableError> {
    let mut entries = Vec::new();
    while !buf.is_empty() {
        let name = read_shortstr(&mut buf)?;
        let value = read_value(&mut buf)?;
        entries.push((name, value));
    }
    Ok(entries)
}

/// Decode a field table that is itself prefixed with a 4-byte length, as it
/// appears inline inside a method body.
pub fn decode_framed(buf: &mut &[u8]) -> Result<Vec<(String, FieldValue)>, FieldTableError> {
    if buf.len() < 4 {
        return Err(FieldTableError::Truncated);
    }
    let len = u32::from_be_bytes(buf[0..4].try_into().unwrap()) as usize;
    buf.advance(4);
    if buf.len() < len {
        return Err(FieldTableError::Truncated);
    }
    let table = decode(&buf[..len])?;
    buf.advance(len);
    Ok(table)
}

pub fn encode(table: &[(String, FieldValue)]) -> Vec<u8> {
    let mut out = BytesMut::new();
    for (name, value) in table {
        write_shortstr(&mut out, name);
        write_value(&mut out, value);
    }
    out.to_vec()
}

/// Encode a field table with its 4-byte length prefix, for inline use in a
/// method body.
pub fn encode_framed(out: &mut BytesMut, table: &[(String, FieldValue)]) {
    let body = encode(table);
    out.put_u32(body.len() as u32);
    out.put_slice(&body);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Vec<(String, FieldValue)> {
        vec![
            ("str".into(), FieldValue::LongStr("hello".into())),
            ("flag".into(), FieldValue::Bool(true)),
            ("n".into(), FieldValue::I32(-42)),
            ("u".into(), FieldValue::U64(9_000_000_000)),
            ("nothing".into(), FieldValue::Void),
            (
                "nested".into(),
                FieldValue::Table(vec![("inner".into(), FieldValue::U8(7))]),
            ),
            (
                "list".into(),
                FieldValue::Array(vec![FieldValue::I8(1), FieldValue::I8(2)]),
            ),
            ("blob".into(), FieldValue::ByteArray(vec![1, 2, 3])),
        ]
    }

    #[test]
    fn round_trip() {
        let table = sample_table();
        let encoded = encode(&table);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn framed_round_trip() {
        let table = sample_table();
        let mut out = BytesMut::new();
        encode_framed(&mut out, &table);
        let mut slice = &out[..];
        let decoded = decode_framed(&mut slice).unwrap();
        assert_eq!(decoded, table);
        assert!(slice.is_empty());
    }

    #[test]
    fn unknown_tag_fails() {
        let mut buf = BytesMut::new();
        write_shortstr(&mut buf, "x");
        buf.put_u8(b'?');
        assert_eq!(decode(&buf).unwrap_err(), FieldTableError::UnknownTag(b'?'));
    }
}
