// SPDX-License-Identifier: MIT OR Apache-2.0

//! The immutable columnar file container.
//!
//! Rows are serialized sequentially rather than transposed into true
//! column-major storage: the logical schema is parallel arrays indexed in
//! input order, not a mandated physical layout, and a reader only ever
//! needs whole rows (`decode_variant` et al. operate per-row). The
//! container carries a magic/version header and a trailing checksum over
//! the body, the same shape as a segment file trailer.

use crate::codec::ColumnBatch;
use crate::coding::{Decode, DecodeError, Encode, EncodeError};
use crate::object::{EncodedRow, ObjectType, StorageMode};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

const MAGIC: [u8; 4] = *b"GCAS";
const FORMAT_VERSION: u8 = 1;

const COMPRESSION_NONE: u8 = 0;
const COMPRESSION_LZ4: u8 = 1;

fn write_optional_str<W: Write>(writer: &mut W, value: &Option<String>) -> Result<(), EncodeError> {
    match value {
        None => writer.write_u8(0)?,
        Some(s) => {
            writer.write_u8(1)?;
            let bytes = s.as_bytes();
            writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
            writer.write_all(bytes)?;
        }
    }
    Ok(())
}

fn read_optional_str<R: Read>(reader: &mut R) -> Result<Option<String>, DecodeError> {
    if reader.read_u8()? == 0 {
        return Ok(None);
    }
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(Some(String::from_utf8(buf).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?))
}

fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<(), EncodeError> {
    writer.write_u32::<LittleEndian>(bytes.len() as u32)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(reader: &mut R) -> Result<Vec<u8>, DecodeError> {
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_optional_bytes<W: Write>(writer: &mut W, value: &Option<Vec<u8>>) -> Result<(), EncodeError> {
    match value {
        None => writer.write_u8(0)?,
        Some(b) => {
            writer.write_u8(1)?;
            write_bytes(writer, b)?;
        }
    }
    Ok(())
}

fn read_optional_bytes<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, DecodeError> {
    if reader.read_u8()? == 0 {
        return Ok(None);
    }
    Ok(Some(read_bytes(reader)?))
}

fn write_optional_i64<W: Write>(writer: &mut W, value: Option<i64>) -> Result<(), EncodeError> {
    match value {
        None => writer.write_u8(0)?,
        Some(v) => {
            writer.write_u8(1)?;
            writer.write_i64::<LittleEndian>(v)?;
        }
    }
    Ok(())
}

fn read_optional_i64<R: Read>(reader: &mut R) -> Result<Option<i64>, DecodeError> {
    if reader.read_u8()? == 0 {
        return Ok(None);
    }
    Ok(Some(reader.read_i64::<LittleEndian>()?))
}

impl Encode for EncodedRow {
    fn encode_into<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        writer.write_all(self.sha.as_bytes())?;
        writer.write_u8(object_type_tag(self.object_type))?;
        writer.write_u64::<LittleEndian>(self.size)?;
        writer.write_u8(storage_mode_tag(self.storage))?;
        write_bytes(writer, &self.variant_metadata)?;
        write_bytes(writer, &self.variant_value)?;
        write_optional_bytes(writer, &self.raw_data)?;
        write_optional_str(writer, &self.path)?;
        write_optional_str(writer, &self.author_name)?;
        write_optional_i64(writer, self.author_date)?;
        write_optional_str(writer, &self.message)?;
        Ok(())
    }
}

impl Decode for EncodedRow {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let mut sha_bytes = [0u8; 40];
        reader.read_exact(&mut sha_bytes)?;
        let sha = String::from_utf8(sha_bytes.to_vec()).map_err(|e| DecodeError::InvalidEncoding(e.to_string()))?;

        let object_type = object_type_from_tag(reader.read_u8()?)?;
        let size = reader.read_u64::<LittleEndian>()?;
        let storage = storage_mode_from_tag(reader.read_u8()?)?;
        let variant_metadata = read_bytes(reader)?;
        let variant_value = read_bytes(reader)?;
        let raw_data = read_optional_bytes(reader)?;
        let path = read_optional_str(reader)?;
        let author_name = read_optional_str(reader)?;
        let author_date = read_optional_i64(reader)?;
        let message = read_optional_str(reader)?;

        Ok(Self {
            sha,
            object_type,
            size,
            storage,
            variant_metadata,
            variant_value,
            raw_data,
            path,
            author_name,
            author_date,
            message,
        })
    }
}

fn object_type_tag(t: ObjectType) -> u8 {
    match t {
        ObjectType::Blob => 0,
        ObjectType::Tree => 1,
        ObjectType::Commit => 2,
        ObjectType::Tag => 3,
    }
}

fn object_type_from_tag(tag: u8) -> Result<ObjectType, DecodeError> {
    match tag {
        0 => Ok(ObjectType::Blob),
        1 => Ok(ObjectType::Tree),
        2 => Ok(ObjectType::Commit),
        3 => Ok(ObjectType::Tag),
        other => Err(DecodeError::InvalidEncoding(format!("unknown object type tag {other}"))),
    }
}

fn storage_mode_tag(m: StorageMode) -> u8 {
    match m {
        StorageMode::Inline => 0,
        StorageMode::R2 => 1,
        StorageMode::Lfs => 2,
    }
}

fn storage_mode_from_tag(tag: u8) -> Result<StorageMode, DecodeError> {
    match tag {
        0 => Ok(StorageMode::Inline),
        1 => Ok(StorageMode::R2),
        2 => Ok(StorageMode::Lfs),
        other => Err(DecodeError::InvalidEncoding(format!("unknown storage mode tag {other}"))),
    }
}

/// Serializes a batch into the on-disk columnar file format: a magic/
/// version/row-count header, the (optionally lz4-compressed) row bytes,
/// and a trailing SHA-256 checksum over everything that precedes it.
#[must_use]
pub fn encode_columnar_file(batch: &ColumnBatch) -> Vec<u8> {
    let mut raw_rows = Vec::new();
    for row in &batch.rows {
        row.encode_into(&mut raw_rows).expect("in-memory write cannot fail");
    }
    let (compression_tag, rows_blob) = compress_rows(raw_rows);

    let mut body = Vec::new();
    body.extend_from_slice(&MAGIC);
    body.push(FORMAT_VERSION);
    body.push(compression_tag);
    body.extend_from_slice(&(batch.rows.len() as u32).to_le_bytes());
    body.extend_from_slice(&(rows_blob.len() as u32).to_le_bytes());
    body.extend_from_slice(&rows_blob);

    let checksum = Sha256::digest(&body);
    let mut out = body;
    out.extend_from_slice(&checksum);
    out
}

#[cfg(feature = "lz4")]
fn compress_rows(raw_rows: Vec<u8>) -> (u8, Vec<u8>) {
    (COMPRESSION_LZ4, lz4_flex::block::compress_prepend_size(&raw_rows))
}

#[cfg(not(feature = "lz4"))]
fn compress_rows(raw_rows: Vec<u8>) -> (u8, Vec<u8>) {
    (COMPRESSION_NONE, raw_rows)
}

#[cfg(feature = "lz4")]
fn decompress_rows(blob: &[u8]) -> Result<Vec<u8>, DecodeError> {
    lz4_flex::block::decompress_size_prepended(blob)
        .map_err(|e| DecodeError::InvalidEncoding(format!("lz4 decompress failed: {e}")))
}

#[cfg(not(feature = "lz4"))]
fn decompress_rows(_blob: &[u8]) -> Result<Vec<u8>, DecodeError> {
    Err(DecodeError::InvalidEncoding(
        "file is lz4-compressed but this build lacks the lz4 feature".into(),
    ))
}

fn decode_rows_blob(compression_tag: u8, blob: &[u8]) -> Result<Vec<u8>, DecodeError> {
    match compression_tag {
        COMPRESSION_NONE => Ok(blob.to_vec()),
        COMPRESSION_LZ4 => decompress_rows(blob),
        other => Err(DecodeError::InvalidEncoding(format!("unknown compression tag {other}"))),
    }
}

/// Parses a columnar file produced by [`encode_columnar_file`], verifying
/// its checksum first. A checksum mismatch or truncated structure surfaces
/// as [`DecodeError::InvalidEncoding`], which the engine maps to
/// `Corruption`.
pub fn decode_columnar_file(bytes: &[u8]) -> Result<Vec<EncodedRow>, DecodeError> {
    if bytes.len() < 32 {
        return Err(DecodeError::InvalidEncoding("file too short to contain a checksum".into()));
    }
    let (body, checksum) = bytes.split_at(bytes.len() - 32);
    let expected = Sha256::digest(body);
    if expected.as_slice() != checksum {
        return Err(DecodeError::InvalidEncoding("checksum mismatch".into()));
    }

    let mut cursor = std::io::Cursor::new(body);
    let mut magic = [0u8; 4];
    cursor.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(DecodeError::InvalidEncoding("bad magic bytes".into()));
    }
    let version = cursor.read_u8()?;
    if version != FORMAT_VERSION {
        return Err(DecodeError::InvalidEncoding(format!("unsupported format version {version}")));
    }
    let compression_tag = cursor.read_u8()?;
    let row_count = cursor.read_u32::<LittleEndian>()? as usize;
    let blob_len = cursor.read_u32::<LittleEndian>()? as usize;
    let mut blob = vec![0u8; blob_len];
    cursor.read_exact(&mut blob)?;
    let raw_rows = decode_rows_blob(compression_tag, &blob)?;

    let mut row_cursor = std::io::Cursor::new(raw_rows.as_slice());
    let mut rows = Vec::with_capacity(row_count);
    for _ in 0..row_count {
        rows.push(EncodedRow::decode_from(&mut row_cursor)?);
    }
    Ok(rows)
}

/// Computes the deterministic `file-id` for a freshly flushed buffer: the
/// hex of the first 16 bytes of SHA-256 over the sorted SHAs of the batch.
/// Re-flushing identical buffer content is therefore idempotent.
#[must_use]
pub fn file_id_for_shas(shas: &[String]) -> String {
    let mut sorted: Vec<&str> = shas.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for sha in &sorted {
        hasher.update(sha.as_bytes());
    }
    let digest = hasher.finalize();
    crate::hash::bytes_to_hex(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_object, EncodeOptions};

    fn sample_batch() -> ColumnBatch {
        let options = EncodeOptions::default();
        let sha = crate::hash::hash_object("blob", b"hello");
        let row = encode_object(&sha, ObjectType::Blob, b"hello", Some("a/b.txt".into()), &options);
        ColumnBatch { rows: vec![row] }
    }

    #[test]
    fn round_trips_a_batch() {
        let batch = sample_batch();
        let bytes = encode_columnar_file(&batch);
        let rows = decode_columnar_file(&bytes).unwrap();
        assert_eq!(rows, batch.rows);
    }

    #[test]
    fn detects_checksum_corruption() {
        let batch = sample_batch();
        let mut bytes = encode_columnar_file(&batch);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let err = decode_columnar_file(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEncoding(_)));
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn round_trips_through_lz4_compression() {
        let batch = sample_batch();
        let bytes = encode_columnar_file(&batch);
        assert_eq!(bytes[5], COMPRESSION_LZ4);
        let rows = decode_columnar_file(&bytes).unwrap();
        assert_eq!(rows, batch.rows);
    }

    #[cfg(not(feature = "lz4"))]
    #[test]
    fn lz4_tagged_file_is_rejected_without_the_feature() {
        let mut body = Vec::new();
        body.extend_from_slice(&MAGIC);
        body.push(FORMAT_VERSION);
        body.push(COMPRESSION_LZ4);
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&4u32.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]);
        let checksum = Sha256::digest(&body);
        let mut bytes = body;
        bytes.extend_from_slice(&checksum);

        let err = decode_columnar_file(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEncoding(_)));
    }

    #[test]
    fn file_id_is_order_independent_and_deterministic() {
        let shas = vec!["b".repeat(40), "a".repeat(40)];
        let reordered = vec![shas[1].clone(), shas[0].clone()];
        assert_eq!(file_id_for_shas(&shas), file_id_for_shas(&reordered));
    }
}
