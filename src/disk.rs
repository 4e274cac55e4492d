//! The on-disk codec: a one-byte bit-packed prefix followed by a short
//! length field and either a raw or LZ4-compressed point payload.
//!
//! Layout (see spec.md §4.2):
//!
//! ```text
//! byte 0 (prefix, msb0 bit numbering):
//!   bit 0      extended flag
//!   bits 1..4  version (0-7)
//!   bit 4      compression (0=Normal, 1=Compressed)
//!   bit 5      quantity (0=Single, 1=Multiple)
//!   bits 6..8  size, high 2 bits of a 10-bit length
//! byte 1:
//!   size, low 8 bits of the 10-bit length
//! ```
//!
//! `VaultPrefix` only ever describes a 10-bit length (0..=1023). That keeps
//! `encode()` always exactly 2 bytes (testable property 1 / scenario S1). A
//! `Multiple` record's payload is simply a concatenation of `Single`
//! records (§4.2), so there is never a need for a length wider than one
//! record's own compressed-or-raw size.

use std::io::{Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use packed_struct::prelude::*;

use crate::error::VaultaireError;
use crate::point::{Payload, Point, SourceDict};

/// Compresses `raw` using LZ4 frame format (spec.md §6).
pub fn lz4_compress(raw: &[u8]) -> Result<Vec<u8>, VaultaireError> {
    let mut encoder = FrameEncoder::new(Vec::new());
    encoder
        .write_all(raw)
        .map_err(|e| VaultaireError::CompressionError(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| VaultaireError::CompressionError(e.to_string()))
}

/// Decompresses an LZ4 frame-format payload.
pub fn lz4_decompress(compressed: &[u8]) -> Result<Vec<u8>, VaultaireError> {
    let mut decoder = FrameDecoder::new(compressed);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| VaultaireError::CompressionError(e.to_string()))?;
    Ok(out)
}

pub const MAX_INLINE_SIZE: usize = 1023;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Normal,
    Compressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Single,
    Multiple,
}

#[derive(Debug, PackedStruct, PartialEq, Eq, Clone, Copy)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "1")]
struct PrefixByte {
    #[packed_field(bits = "0")]
    extended: bool,
    #[packed_field(bits = "1..4")]
    version: Integer<u8, packed_bits::Bits<3>>,
    #[packed_field(bits = "4")]
    compressed: bool,
    #[packed_field(bits = "5")]
    multiple: bool,
    #[packed_field(bits = "6..8")]
    size_hi: Integer<u8, packed_bits::Bits<2>>,
}

/// The bit-packed header preceding every on-disk point record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultPrefix {
    pub extended: bool,
    pub version: u8,
    pub compression: Compression,
    pub quantity: Quantity,
    pub size: u16,
}

impl VaultPrefix {
    pub fn new(
        extended: bool,
        version: u8,
        compression: Compression,
        quantity: Quantity,
        size: u16,
    ) -> Result<Self, VaultaireError> {
        if version > 7 {
            return Err(VaultaireError::BytePackingError(format!(
                "version {version} does not fit in 3 bits"
            )));
        }
        if size as usize > MAX_INLINE_SIZE {
            return Err(VaultaireError::BytePackingError(format!(
                "record size {size} exceeds the {MAX_INLINE_SIZE}-byte inline limit"
            )));
        }
        Ok(Self {
            extended,
            version,
            compression,
            quantity,
            size,
        })
    }

    /// Always exactly 2 bytes (testable property 1).
    pub fn encode(&self) -> [u8; 2] {
        let packed = PrefixByte {
            extended: self.extended,
            version: self.version.into(),
            compressed: matches!(self.compression, Compression::Compressed),
            multiple: matches!(self.quantity, Quantity::Multiple),
            size_hi: ((self.size >> 8) as u8 & 0b11).into(),
        }
        .pack()
        .expect("PrefixByte is infallible to pack");
        [packed[0], (self.size & 0xFF) as u8]
    }

    pub fn decode(bytes: [u8; 2]) -> Result<Self, VaultaireError> {
        let packed = PrefixByte::unpack(&[bytes[0]])?;
        let size_hi: u8 = packed.size_hi.into();
        let size = ((size_hi as u16) << 8) | bytes[1] as u16;
        Ok(Self {
            extended: packed.extended,
            version: packed.version.into(),
            compression: if packed.compressed {
                Compression::Compressed
            } else {
                Compression::Normal
            },
            quantity: if packed.multiple {
                Quantity::Multiple
            } else {
                Quantity::Single
            },
            size,
        })
    }
}

/// Current on-disk format version written by this daemon.
pub const CURRENT_VERSION: u8 = 1;

/// A single encoded on-disk record: prefix + its payload bytes, ready to be
/// appended to a bucket object.
pub fn encode_point(point: &Point) -> Result<Vec<u8>, VaultaireError> {
    let raw = encode_point_body(point);
    let (compression, body) = match lz4_compress(&raw) {
        Ok(compressed) if compressed.len() < raw.len() => (Compression::Compressed, compressed),
        _ => (Compression::Normal, raw),
    };
    if body.len() > MAX_INLINE_SIZE {
        return Err(VaultaireError::BytePackingError(format!(
            "encoded point body of {} bytes exceeds the {MAX_INLINE_SIZE}-byte inline limit",
            body.len()
        )));
    }
    let prefix = VaultPrefix::new(
        point.payload.is_extended(),
        CURRENT_VERSION,
        compression,
        Quantity::Single,
        body.len() as u16,
    )?;
    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&prefix.encode());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Encodes many points as a concatenated sequence of `Single` disk records:
/// one fully independent prefix+body per point. This is distinct from
/// `encode_multiple_record`, which packs several point bodies under one
/// shared `Quantity::Multiple` prefix and compresses them together.
pub fn encode_points(points: &[Point]) -> Result<Vec<u8>, VaultaireError> {
    let mut out = Vec::new();
    for point in points {
        out.extend(encode_point(point)?);
    }
    Ok(out)
}

/// Encodes several points as a single on-disk record with
/// `Quantity::Multiple`: the payload is the concatenation of each point's
/// self-delimiting body, compressed together as one blob (§4.2: "For
/// Multiple, the payload is a concatenated sequence of Single entries").
pub fn encode_multiple_record(points: &[Point]) -> Result<Vec<u8>, VaultaireError> {
    if points.is_empty() {
        return Err(VaultaireError::BytePackingError(
            "a Multiple-quantity record needs at least one point".into(),
        ));
    }
    let mut raw = Vec::new();
    for point in points {
        raw.extend(encode_point_body(point));
    }
    let (compression, body) = match lz4_compress(&raw) {
        Ok(compressed) if compressed.len() < raw.len() => (Compression::Compressed, compressed),
        _ => (Compression::Normal, raw),
    };
    if body.len() > MAX_INLINE_SIZE {
        return Err(VaultaireError::BytePackingError(format!(
            "encoded multiple-record body of {} bytes exceeds the {MAX_INLINE_SIZE}-byte inline limit",
            body.len()
        )));
    }
    let extended = points.iter().any(|p| p.payload.is_extended());
    let prefix = VaultPrefix::new(
        extended,
        CURRENT_VERSION,
        compression,
        Quantity::Multiple,
        body.len() as u16,
    )?;
    let mut out = Vec::with_capacity(2 + body.len());
    out.extend_from_slice(&prefix.encode());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decodes every record out of a bucket object's raw bytes. Stops cleanly
/// at the end of the buffer; a truncated trailing record is an error. A
/// `Multiple`-quantity record's decompressed body is itself a concatenation
/// of self-delimiting point bodies and is expanded into N points.
pub fn decode_points(origin: &[u8], mut buf: &[u8]) -> Result<Vec<Point>, VaultaireError> {
    let mut points = Vec::new();
    while !buf.is_empty() {
        if buf.len() < 2 {
            return Err(VaultaireError::BytePackingError(
                "truncated record: fewer than 2 header bytes remain".into(),
            ));
        }
        let prefix = VaultPrefix::decode([buf[0], buf[1]])?;
        let body_start = 2;
        let body_end = body_start + prefix.size as usize;
        if buf.len() < body_end {
            return Err(VaultaireError::BytePackingError(
                "truncated record: declared size exceeds remaining buffer".into(),
            ));
        }
        let body = &buf[body_start..body_end];
        let raw = match prefix.compression {
            Compression::Normal => body.to_vec(),
            Compression::Compressed => lz4_decompress(body)?,
        };
        match prefix.quantity {
            Quantity::Single => {
                let (point, consumed) = decode_point_body(origin, &raw)?;
                if consumed != raw.len() {
                    return Err(VaultaireError::BytePackingError(
                        "single-quantity record has trailing bytes after its point body".into(),
                    ));
                }
                points.push(point);
            }
            Quantity::Multiple => {
                let mut offset = 0;
                while offset < raw.len() {
                    let (point, consumed) = decode_point_body(origin, &raw[offset..])?;
                    points.push(point);
                    offset += consumed;
                }
            }
        }
        buf = &buf[body_end..];
    }
    Ok(points)
}

/// The uncompressed point body: timestamp, payload kind, payload bytes,
/// and the source dict's tag pairs. This is internal to the disk codec and
/// distinct from the client-facing wire schema in `wire.rs`.
fn encode_point_body(point: &Point) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&point.timestamp.to_le_bytes());
    match &point.payload {
        Payload::Empty => out.push(0),
        Payload::Numeric(v) => {
            out.push(1);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Payload::Measurement(v) => {
            out.push(2);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Payload::Textual(s) => {
            out.push(3);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Payload::Blob(b) => {
            out.push(4);
            out.extend_from_slice(&(b.len() as u32).to_le_bytes());
            out.extend_from_slice(b);
        }
    }
    out.extend_from_slice(&(point.source.len() as u16).to_le_bytes());
    for (k, v) in point.source.iter() {
        out.extend_from_slice(&(k.len() as u16).to_le_bytes());
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(&(v.len() as u16).to_le_bytes());
        out.extend_from_slice(v.as_bytes());
    }
    out
}

/// Decodes one point body from the front of `buf`, returning the point and
/// the number of bytes it consumed — point bodies are self-delimiting, so
/// this is how `decode_points` walks a `Multiple`-quantity record's
/// concatenated payload without a separate per-entry length field.
fn decode_point_body(origin: &[u8], buf: &[u8]) -> Result<(Point, usize), VaultaireError> {
    let err = || VaultaireError::BytePackingError("truncated point body".into());
    if buf.len() < 9 {
        return Err(err());
    }
    let timestamp = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    let kind = buf[8];
    let mut pos = 9;
    let payload = match kind {
        0 => Payload::Empty,
        1 => {
            let v = i64::from_le_bytes(buf.get(pos..pos + 8).ok_or_else(err)?.try_into().unwrap());
            pos += 8;
            Payload::Numeric(v)
        }
        2 => {
            let v = f64::from_le_bytes(buf.get(pos..pos + 8).ok_or_else(err)?.try_into().unwrap());
            pos += 8;
            Payload::Measurement(v)
        }
        3 => {
            let len =
                u32::from_le_bytes(buf.get(pos..pos + 4).ok_or_else(err)?.try_into().unwrap())
                    as usize;
            pos += 4;
            let s = std::str::from_utf8(buf.get(pos..pos + len).ok_or_else(err)?)?.to_string();
            pos += len;
            Payload::Textual(s)
        }
        4 => {
            let len =
                u32::from_le_bytes(buf.get(pos..pos + 4).ok_or_else(err)?.try_into().unwrap())
                    as usize;
            pos += 4;
            let b = buf.get(pos..pos + len).ok_or_else(err)?.to_vec();
            pos += len;
            Payload::Blob(b)
        }
        other => {
            return Err(VaultaireError::BytePackingError(format!(
                "unknown payload kind byte {other}"
            )))
        }
    };
    let tag_count =
        u16::from_le_bytes(buf.get(pos..pos + 2).ok_or_else(err)?.try_into().unwrap()) as usize;
    pos += 2;
    let mut source = SourceDict::new();
    for _ in 0..tag_count {
        let klen =
            u16::from_le_bytes(buf.get(pos..pos + 2).ok_or_else(err)?.try_into().unwrap())
                as usize;
        pos += 2;
        let k = std::str::from_utf8(buf.get(pos..pos + klen).ok_or_else(err)?)?.to_string();
        pos += klen;
        let vlen =
            u16::from_le_bytes(buf.get(pos..pos + 2).ok_or_else(err)?.try_into().unwrap())
                as usize;
        pos += 2;
        let v = std::str::from_utf8(buf.get(pos..pos + vlen).ok_or_else(err)?)?.to_string();
        pos += vlen;
        source.insert(k, v);
    }
    Ok((
        Point {
            origin: origin.to_vec(),
            source,
            timestamp,
            payload,
        },
        pos,
    ))
}
