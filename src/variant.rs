// SPDX-License-Identifier: MIT OR Apache-2.0

//! C2 (part 1) — the self-describing semi-structured "variant" value used to
//! carry `variant_metadata`/`variant_value` columns.
//!
//! A [`Value`] is serialized into a `(metadata, value)` byte pair. The
//! metadata vector is a dictionary of field names encountered in the value,
//! ordered by first appearance; the value vector is a tagged union that
//! references dictionary entries by id. The layout is private to this
//! crate: `decode_variant` only has to round-trip what `encode_variant`
//! produced here, compatibility with third-party variant readers is not a
//! goal.

use crate::coding::DecodeError;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashMap;

/// A semi-structured value, the in-memory form of a `(metadata, value)`
/// variant pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    /// Milliseconds since the Unix epoch.
    TimestampMillis(i64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
}

const TAG_NULL: u8 = 0;
const TAG_BOOL_FALSE: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_I8: u8 = 3;
const TAG_I16: u8 = 4;
const TAG_I32: u8 = 5;
const TAG_I64: u8 = 6;
const TAG_F64: u8 = 7;
const TAG_TIMESTAMP_MILLIS: u8 = 8;
const TAG_SHORT_STR: u8 = 9;
const TAG_LONG_STR: u8 = 10;
const TAG_BYTES: u8 = 11;
const TAG_ARRAY: u8 = 12;
const TAG_OBJECT: u8 = 13;

const SHORT_STR_MAX_LEN: usize = 255;

/// Dictionary of field names, assigned ids in first-appearance order.
#[derive(Default)]
struct Dictionary {
    ids: HashMap<String, u32>,
    names: Vec<String>,
}

impl Dictionary {
    fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_owned());
        self.ids.insert(name.to_owned(), id);
        id
    }
}

fn collect_field_names(value: &Value, dict: &mut Dictionary) {
    match value {
        Value::Object(fields) => {
            for (name, v) in fields {
                dict.intern(name);
                collect_field_names(v, dict);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_field_names(v, dict);
            }
        }
        _ => {}
    }
}

/// Encodes `value` into a `(metadata, value)` byte pair.
#[must_use]
pub fn encode_variant(value: &Value) -> (Vec<u8>, Vec<u8>) {
    let mut dict = Dictionary::default();
    collect_field_names(value, &mut dict);

    let metadata = encode_dictionary(&dict.names);

    let mut value_bytes = Vec::new();
    encode_value(value, &dict, &mut value_bytes);

    (metadata, value_bytes)
}

fn offset_width_for(max_offset: usize) -> u8 {
    if max_offset <= u8::MAX as usize {
        1
    } else if max_offset <= u16::MAX as usize {
        2
    } else {
        4
    }
}

fn write_offset(out: &mut Vec<u8>, width: u8, value: u32) {
    match width {
        1 => out.push(value as u8),
        2 => {
            let mut buf = [0u8; 2];
            LittleEndian::write_u16(&mut buf, value as u16);
            out.extend_from_slice(&buf);
        }
        _ => {
            let mut buf = [0u8; 4];
            LittleEndian::write_u32(&mut buf, value);
            out.extend_from_slice(&buf);
        }
    }
}

fn read_offset(bytes: &[u8], width: u8, idx: usize) -> Result<u32, DecodeError> {
    let start = idx * width as usize;
    let end = start + width as usize;
    let slice = bytes
        .get(start..end)
        .ok_or_else(|| DecodeError::InvalidEncoding("offset out of bounds".into()))?;
    Ok(match width {
        1 => slice[0] as u32,
        2 => LittleEndian::read_u16(slice) as u32,
        _ => LittleEndian::read_u32(slice),
    })
}

/// Metadata layout: `[offset_width: u8][count: u32 LE][offsets...][bytes...]`
/// with `count + 1` offsets (the last marks the end of the string data).
fn encode_dictionary(names: &[String]) -> Vec<u8> {
    let body: Vec<&[u8]> = names.iter().map(String::as_bytes).collect();
    let total_len: usize = body.iter().map(|b| b.len()).sum();
    let width = offset_width_for(total_len);

    let mut out = Vec::new();
    out.push(width);

    let mut count_buf = [0u8; 4];
    LittleEndian::write_u32(&mut count_buf, names.len() as u32);
    out.extend_from_slice(&count_buf);

    let mut running = 0u32;
    write_offset(&mut out, width, running);
    for chunk in &body {
        running += chunk.len() as u32;
        write_offset(&mut out, width, running);
    }

    for chunk in &body {
        out.extend_from_slice(chunk);
    }

    out
}

fn decode_dictionary(metadata: &[u8]) -> Result<Vec<String>, DecodeError> {
    if metadata.is_empty() {
        return Ok(Vec::new());
    }
    let width = metadata[0];
    if !matches!(width, 1 | 2 | 4) {
        return Err(DecodeError::InvalidEncoding(format!(
            "invalid variant metadata offset width {width}"
        )));
    }
    let count = LittleEndian::read_u32(
        metadata
            .get(1..5)
            .ok_or_else(|| DecodeError::InvalidEncoding("truncated variant metadata".into()))?,
    ) as usize;

    let offsets_start = 5;
    let offsets_len = (count + 1) * width as usize;
    let offsets = &metadata[offsets_start..];
    let data_start = offsets_start + offsets_len;
    let data = metadata
        .get(data_start..)
        .ok_or_else(|| DecodeError::InvalidEncoding("truncated variant dictionary data".into()))?;

    let mut names = Vec::with_capacity(count);
    for i in 0..count {
        let start = read_offset(offsets, width, i)? as usize;
        let end = read_offset(offsets, width, i + 1)? as usize;
        let bytes = data
            .get(start..end)
            .ok_or_else(|| DecodeError::InvalidEncoding("dictionary entry out of bounds".into()))?;
        names.push(
            String::from_utf8(bytes.to_vec())
                .map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?,
        );
    }
    Ok(names)
}

fn encode_value(value: &Value, dict: &Dictionary, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_BOOL_FALSE),
        Value::Bool(true) => out.push(TAG_BOOL_TRUE),
        Value::I8(v) => {
            out.push(TAG_I8);
            out.push(*v as u8);
        }
        Value::I16(v) => {
            out.push(TAG_I16);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::I32(v) => {
            out.push(TAG_I32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::I64(v) => {
            out.push(TAG_I64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::F64(v) => {
            out.push(TAG_F64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::TimestampMillis(v) => {
            out.push(TAG_TIMESTAMP_MILLIS);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Value::Str(s) => {
            let bytes = s.as_bytes();
            if bytes.len() <= SHORT_STR_MAX_LEN {
                out.push(TAG_SHORT_STR);
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
            } else {
                out.push(TAG_LONG_STR);
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                out.extend_from_slice(bytes);
            }
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
        Value::Array(items) => {
            out.push(TAG_ARRAY);
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(item, dict, out);
            }
        }
        Value::Object(fields) => {
            out.push(TAG_OBJECT);
            out.extend_from_slice(&(fields.len() as u32).to_le_bytes());
            for (name, v) in fields {
                let id = *dict.ids.get(name).expect("collected during pre-pass");
                out.extend_from_slice(&id.to_le_bytes());
                encode_value(v, dict, out);
            }
        }
    }
}

/// Decodes a `(metadata, value)` byte pair produced by [`encode_variant`].
pub fn decode_variant(metadata: &[u8], value: &[u8]) -> Result<Value, DecodeError> {
    let names = decode_dictionary(metadata)?;
    let mut cursor = 0usize;
    let decoded = decode_value(value, &names, &mut cursor)?;
    Ok(decoded)
}

fn take<'a>(bytes: &'a [u8], cursor: &mut usize, len: usize) -> Result<&'a [u8], DecodeError> {
    let start = *cursor;
    let end = start
        .checked_add(len)
        .ok_or_else(|| DecodeError::InvalidEncoding("length overflow".into()))?;
    let slice = bytes
        .get(start..end)
        .ok_or_else(|| DecodeError::InvalidEncoding("unexpected end of variant value".into()))?;
    *cursor = end;
    Ok(slice)
}

fn take_u8(bytes: &[u8], cursor: &mut usize) -> Result<u8, DecodeError> {
    Ok(take(bytes, cursor, 1)?[0])
}

fn take_u32(bytes: &[u8], cursor: &mut usize) -> Result<u32, DecodeError> {
    Ok(LittleEndian::read_u32(take(bytes, cursor, 4)?))
}

fn decode_value(bytes: &[u8], names: &[String], cursor: &mut usize) -> Result<Value, DecodeError> {
    let tag = take_u8(bytes, cursor)?;
    Ok(match tag {
        TAG_NULL => Value::Null,
        TAG_BOOL_FALSE => Value::Bool(false),
        TAG_BOOL_TRUE => Value::Bool(true),
        TAG_I8 => Value::I8(take_u8(bytes, cursor)? as i8),
        TAG_I16 => Value::I16(i16::from_le_bytes(take(bytes, cursor, 2)?.try_into().unwrap())),
        TAG_I32 => Value::I32(i32::from_le_bytes(take(bytes, cursor, 4)?.try_into().unwrap())),
        TAG_I64 => Value::I64(i64::from_le_bytes(take(bytes, cursor, 8)?.try_into().unwrap())),
        TAG_F64 => Value::F64(f64::from_le_bytes(take(bytes, cursor, 8)?.try_into().unwrap())),
        TAG_TIMESTAMP_MILLIS => {
            Value::TimestampMillis(i64::from_le_bytes(take(bytes, cursor, 8)?.try_into().unwrap()))
        }
        TAG_SHORT_STR => {
            let len = take_u8(bytes, cursor)? as usize;
            let s = take(bytes, cursor, len)?;
            Value::Str(String::from_utf8(s.to_vec()).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?)
        }
        TAG_LONG_STR => {
            let len = take_u32(bytes, cursor)? as usize;
            let s = take(bytes, cursor, len)?;
            Value::Str(String::from_utf8(s.to_vec()).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?)
        }
        TAG_BYTES => {
            let len = take_u32(bytes, cursor)? as usize;
            Value::Bytes(take(bytes, cursor, len)?.to_vec())
        }
        TAG_ARRAY => {
            let len = take_u32(bytes, cursor)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(bytes, names, cursor)?);
            }
            Value::Array(items)
        }
        TAG_OBJECT => {
            let len = take_u32(bytes, cursor)? as usize;
            let mut fields = Vec::with_capacity(len);
            for _ in 0..len {
                let id = take_u32(bytes, cursor)? as usize;
                let name = names
                    .get(id)
                    .ok_or_else(|| DecodeError::InvalidEncoding(format!("dictionary id {id} out of range")))?
                    .clone();
                let value = decode_value(bytes, names, cursor)?;
                fields.push((name, value));
            }
            Value::Object(fields)
        }
        other => return Err(DecodeError::InvalidEncoding(format!("unknown variant tag {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::I64(-42),
            Value::F64(1.5),
            Value::TimestampMillis(1_700_000_000_000),
            Value::Str("hello".into()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            let (meta, val) = encode_variant(&value);
            assert_eq!(decode_variant(&meta, &val).unwrap(), value);
        }
    }

    #[test]
    fn round_trips_r2_object() {
        let value = Value::Object(vec![
            ("r2_key".into(), Value::Str("objects/ab/cdef".into())),
            ("size".into(), Value::I64(2_097_152)),
        ]);
        let (meta, val) = encode_variant(&value);
        assert_eq!(decode_variant(&meta, &val).unwrap(), value);
    }

    #[test]
    fn round_trips_lfs_object_and_nested_array() {
        let value = Value::Object(vec![
            ("r2_key".into(), Value::Str("lfs/ab/cdef".into())),
            ("oid".into(), Value::Str("a".repeat(64))),
            ("size".into(), Value::I64(123)),
            ("pointer".into(), Value::Bool(true)),
            ("tags".into(), Value::Array(vec![Value::Str("x".into()), Value::Null])),
        ]);
        let (meta, val) = encode_variant(&value);
        assert_eq!(decode_variant(&meta, &val).unwrap(), value);
    }

    #[test]
    fn long_string_round_trips() {
        let value = Value::Str("x".repeat(SHORT_STR_MAX_LEN + 10));
        let (meta, val) = encode_variant(&value);
        assert_eq!(decode_variant(&meta, &val).unwrap(), value);
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = decode_variant(&[], &[255]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEncoding(_)));
    }
}
