use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use log::warn;

use crate::FormatError;
use crate::glb::types::{
    BinaryBody, FOURCC_CHUNK_BIN, FOURCC_CHUNK_JSON, FOURCC_GLB, Glb, GlbHeader, HEADER_SIZE,
    V1_CONTENT_FORMAT_JSON,
};

pub struct GlbReader {}

impl GlbReader {
    /// Containers start with the magic fourcc, everything else is treated as raw JSON text.
    pub fn is_binary(data: &[u8]) -> bool {
        data.len() >= 4 && u32::from_le_bytes([data[0], data[1], data[2], data[3]]) == FOURCC_GLB
    }

    pub fn parse(data: &[u8]) -> Result<Glb, FormatError> {
        if data.len() < HEADER_SIZE {
            return Err(FormatError::FormatViolation {
                reason: "container is shorter than its fixed 12 byte header",
            });
        }

        let mut rdr = Cursor::new(data);
        let magic = rdr.read_u32::<LittleEndian>()?;
        if magic != FOURCC_GLB {
            return Err(FormatError::InvalidMagicValue { magic });
        }

        let version = rdr.read_u32::<LittleEndian>()?;
        let declared_length = rdr.read_u32::<LittleEndian>()?;
        if declared_length as usize != data.len() {
            // Only fatal when a later read actually runs past the buffer.
            warn!(
                "Container declares {} bytes but the buffer holds {}",
                declared_length,
                data.len()
            );
        }

        let header = GlbHeader {
            version,
            declared_length,
        };

        match version {
            1 => Self::parse_v1(header, data),
            2 => Self::parse_v2(header, data),
            _ => Err(FormatError::UnsupportedVersion { version }),
        }
    }

    /// Version 1: content length + content format, then the JSON text.
    /// Whatever follows the JSON up to the end of the buffer is the untyped body.
    fn parse_v1(header: GlbHeader, data: &[u8]) -> Result<Glb, FormatError> {
        let mut rdr = Cursor::new(&data[HEADER_SIZE..]);
        let content_length = rdr.read_u32::<LittleEndian>()? as usize;
        let content_format = rdr.read_u32::<LittleEndian>()?;
        if content_format != V1_CONTENT_FORMAT_JSON {
            return Err(FormatError::FormatViolation {
                reason: "version 1 content format must be JSON (0)",
            });
        }

        let content_start = HEADER_SIZE + 8;
        let json = String::from_utf8(Self::slice(data, content_start, content_length)?.to_vec())?;

        let body_start = content_start + content_length;
        let bin = if body_start < data.len() {
            Some(BinaryBody::new(data[body_start..].to_vec()))
        } else {
            None
        };

        Ok(Glb { header, json, bin })
    }

    /// Version 2: typed chunks until the declared total length. The first chunk
    /// must be JSON; at most one BIN chunk is retained, unknown types are skipped.
    fn parse_v2(header: GlbHeader, data: &[u8]) -> Result<Glb, FormatError> {
        let total = (header.declared_length as usize).min(data.len());
        let mut offset = HEADER_SIZE;

        let mut json = None;
        let mut bin = None;

        while offset < total {
            let chunk_header = Self::slice(data, offset, 8)?;
            let length = u32::from_le_bytes(chunk_header[0..4].try_into().unwrap()) as usize;
            let chunk_type = u32::from_le_bytes(chunk_header[4..8].try_into().unwrap());
            let payload = Self::slice(data, offset + 8, length)?;
            offset += 8 + length;

            match chunk_type {
                FOURCC_CHUNK_JSON => {
                    if json.is_some() {
                        return Err(FormatError::FormatViolation {
                            reason: "unexpected second JSON chunk",
                        });
                    }
                    json = Some(String::from_utf8(payload.to_vec())?);
                }
                FOURCC_CHUNK_BIN => {
                    if bin.is_none() {
                        bin = Some(BinaryBody::new(payload.to_vec()));
                    } else {
                        warn!("Ignoring a second BIN chunk of {} bytes", length);
                    }
                }
                other => {
                    warn!(
                        "Skipping unknown chunk type {:#010X} of {} bytes",
                        other, length
                    );
                }
            }

            if json.is_none() {
                return Err(FormatError::FormatViolation {
                    reason: "the first chunk of a version 2 container must be JSON",
                });
            }
        }

        let json = json.ok_or(FormatError::FormatViolation {
            reason: "container ends before the mandatory JSON chunk",
        })?;

        Ok(Glb { header, json, bin })
    }

    fn slice(data: &[u8], offset: usize, length: usize) -> Result<&[u8], FormatError> {
        if offset.checked_add(length).is_none_or(|end| end > data.len()) {
            return Err(FormatError::OutOfRange {
                offset,
                length,
                available: data.len(),
            });
        }
        Ok(&data[offset..offset + length])
    }
}
