//! On-disk container format for archive arrays.
//!
//! Every container is a gzip stream wrapping a little-endian payload:
//!
//! ```text
//! [HEADER]  magic "MCSA" | version(u16) | kind(u8)
//! kind 1    dtype(u8) | width(u32) | len(u64) | values
//! kind 2    count(u32) | repeated: name_len(u16) | name | dtype(u8) | len(u64) | values
//! ```
//!
//! The version tag is decoded exactly once into a [`StoreFormat`]; each
//! format has a single read path.

use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use camino::Utf8Path;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::ArchiveError;

pub const MAGIC: &[u8; 4] = b"MCSA";

const KIND_ARRAY: u8 = 1;
const KIND_COLUMNS: u8 = 2;

const DTYPE_FLOAT: u8 = 0;
const DTYPE_INT: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    V1,
}

impl StoreFormat {
    pub const CURRENT: StoreFormat = StoreFormat::V1;

    pub fn tag(self) -> u16 {
        match self {
            StoreFormat::V1 => 1,
        }
    }

    pub fn from_tag(tag: u16) -> Option<Self> {
        match tag {
            1 => Some(StoreFormat::V1),
            _ => None,
        }
    }
}

/// A flat numeric series.
#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Float(Vec<f64>),
    Int(Vec<i64>),
}

impl Array {
    pub fn len(&self) -> usize {
        match self {
            Array::Float(values) => values.len(),
            Array::Int(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype_name(&self) -> &'static str {
        match self {
            Array::Float(_) => "float",
            Array::Int(_) => "int",
        }
    }

    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            Array::Int(values) => Some(values),
            Array::Float(_) => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            Array::Float(values) => Some(values),
            Array::Int(_) => None,
        }
    }

    /// Appends `other`; returns false when the element types differ.
    pub fn extend_from(&mut self, other: &Array) -> bool {
        match (self, other) {
            (Array::Float(values), Array::Float(more)) => values.extend_from_slice(more),
            (Array::Int(values), Array::Int(more)) => values.extend_from_slice(more),
            _ => return false,
        }
        true
    }

    /// Gathers elements in `order`, which must index into `self`.
    pub fn take(&self, order: &[usize]) -> Array {
        match self {
            Array::Float(values) => Array::Float(order.iter().map(|&i| values[i]).collect()),
            Array::Int(values) => Array::Int(order.iter().map(|&i| values[i]).collect()),
        }
    }

    /// Bitwise equality, so NaN fill values compare equal to themselves.
    pub fn same_bits(&self, other: &Array) -> bool {
        match (self, other) {
            (Array::Float(a), Array::Float(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
            }
            (Array::Int(a), Array::Int(b)) => a == b,
            _ => false,
        }
    }
}

pub fn encode_array(array: &Array, width: u32) -> Result<Vec<u8>, ArchiveError> {
    let mut payload = header(KIND_ARRAY);
    write_array(&mut payload, array, Some(width)).map_err(crate::error::fs_err)?;
    compress(&payload)
}

pub fn decode_array(path: &Utf8Path, bytes: &[u8]) -> Result<(Array, u32), ArchiveError> {
    let payload = decompress(path, bytes)?;
    let mut reader = Cursor::new(payload.as_slice());
    match read_header(path, &mut reader)? {
        (StoreFormat::V1, KIND_ARRAY) => {
            let dtype = reader.read_u8().map_err(|err| truncated(path, err))?;
            let width = reader
                .read_u32::<LittleEndian>()
                .map_err(|err| truncated(path, err))?;
            let array = read_values(path, &mut reader, dtype)?;
            Ok((array, width))
        }
        (_, kind) => Err(unsupported(path, format!("expected array container, found kind {kind}"))),
    }
}

pub fn encode_columns(columns: &[(String, Array)]) -> Result<Vec<u8>, ArchiveError> {
    let mut payload = header(KIND_COLUMNS);
    let count = u32::try_from(columns.len()).map_err(crate::error::fs_err)?;
    payload
        .write_u32::<LittleEndian>(count)
        .map_err(crate::error::fs_err)?;
    for (name, array) in columns {
        let len = u16::try_from(name.len()).map_err(crate::error::fs_err)?;
        payload
            .write_u16::<LittleEndian>(len)
            .map_err(crate::error::fs_err)?;
        payload.write_all(name.as_bytes()).map_err(crate::error::fs_err)?;
        write_array(&mut payload, array, None).map_err(crate::error::fs_err)?;
    }
    compress(&payload)
}

pub fn decode_columns(path: &Utf8Path, bytes: &[u8]) -> Result<Vec<(String, Array)>, ArchiveError> {
    let payload = decompress(path, bytes)?;
    let mut reader = Cursor::new(payload.as_slice());
    match read_header(path, &mut reader)? {
        (StoreFormat::V1, KIND_COLUMNS) => {
            let count = reader
                .read_u32::<LittleEndian>()
                .map_err(|err| truncated(path, err))?;
            let mut columns = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let len = reader
                    .read_u16::<LittleEndian>()
                    .map_err(|err| truncated(path, err))?;
                let mut name = vec![0u8; len as usize];
                reader
                    .read_exact(&mut name)
                    .map_err(|err| truncated(path, err))?;
                let name = String::from_utf8(name)
                    .map_err(|_| unsupported(path, "column name is not UTF-8"))?;
                let dtype = reader.read_u8().map_err(|err| truncated(path, err))?;
                columns.push((name, read_values(path, &mut reader, dtype)?));
            }
            Ok(columns)
        }
        (_, kind) => Err(unsupported(path, format!("expected column container, found kind {kind}"))),
    }
}

fn header(kind: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&StoreFormat::CURRENT.tag().to_le_bytes());
    out.push(kind);
    out
}

fn read_header(path: &Utf8Path, reader: &mut Cursor<&[u8]>) -> Result<(StoreFormat, u8), ArchiveError> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|err| truncated(path, err))?;
    if &magic != MAGIC {
        return Err(unsupported(path, "bad magic"));
    }
    let tag = reader
        .read_u16::<LittleEndian>()
        .map_err(|err| truncated(path, err))?;
    let format = StoreFormat::from_tag(tag)
        .ok_or_else(|| unsupported(path, format!("unknown format version {tag}")))?;
    let kind = reader.read_u8().map_err(|err| truncated(path, err))?;
    Ok((format, kind))
}

fn write_array<W: Write>(w: &mut W, array: &Array, width: Option<u32>) -> std::io::Result<()> {
    match array {
        Array::Float(values) => {
            w.write_u8(DTYPE_FLOAT)?;
            if let Some(width) = width {
                w.write_u32::<LittleEndian>(width)?;
            }
            w.write_u64::<LittleEndian>(values.len() as u64)?;
            for value in values {
                w.write_f64::<LittleEndian>(*value)?;
            }
        }
        Array::Int(values) => {
            w.write_u8(DTYPE_INT)?;
            if let Some(width) = width {
                w.write_u32::<LittleEndian>(width)?;
            }
            w.write_u64::<LittleEndian>(values.len() as u64)?;
            for value in values {
                w.write_i64::<LittleEndian>(*value)?;
            }
        }
    }
    Ok(())
}

fn read_values(path: &Utf8Path, reader: &mut Cursor<&[u8]>, dtype: u8) -> Result<Array, ArchiveError> {
    let len = reader
        .read_u64::<LittleEndian>()
        .map_err(|err| truncated(path, err))?;
    let remaining = reader.get_ref().len() as u64 - reader.position();
    if len.saturating_mul(8) > remaining {
        return Err(unsupported(path, "payload shorter than declared length"));
    }
    let len = len as usize;
    match dtype {
        DTYPE_FLOAT => {
            let mut values = vec![0f64; len];
            reader
                .read_f64_into::<LittleEndian>(&mut values)
                .map_err(|err| truncated(path, err))?;
            Ok(Array::Float(values))
        }
        DTYPE_INT => {
            let mut values = vec![0i64; len];
            reader
                .read_i64_into::<LittleEndian>(&mut values)
                .map_err(|err| truncated(path, err))?;
            Ok(Array::Int(values))
        }
        other => Err(unsupported(path, format!("unknown dtype {other}"))),
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).map_err(crate::error::fs_err)?;
    encoder.finish().map_err(crate::error::fs_err)
}

fn decompress(path: &Utf8Path, bytes: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut payload = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut payload)
        .map_err(|err| unsupported(path, format!("gzip: {err}")))?;
    Ok(payload)
}

fn truncated(path: &Utf8Path, err: std::io::Error) -> ArchiveError {
    unsupported(path, format!("truncated container: {err}"))
}

fn unsupported(path: &Utf8Path, detail: impl Into<String>) -> ArchiveError {
    ArchiveError::UnsupportedFormat {
        path: path.to_owned(),
        detail: detail.into(),
    }
}
