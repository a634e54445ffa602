use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::FormatError;
use crate::glb::types::{FOURCC_CHUNK_BIN, FOURCC_CHUNK_JSON, FOURCC_GLB, HEADER_SIZE};

pub struct GlbWriter {}

impl GlbWriter {
    /// Encodes a version 2 container. The JSON chunk is padded with spaces and
    /// the BIN chunk with zeroes to keep both four-byte aligned.
    pub fn write<W: Write>(w: &mut W, json: &str, bin: Option<&[u8]>) -> Result<(), FormatError> {
        let json_padding = Self::padding(json.len());
        let bin_padding = bin.map(|b| Self::padding(b.len())).unwrap_or(0);

        let mut total = HEADER_SIZE + 8 + json.len() + json_padding;
        if let Some(bin) = bin {
            total += 8 + bin.len() + bin_padding;
        }

        w.write_u32::<LittleEndian>(FOURCC_GLB)?;
        w.write_u32::<LittleEndian>(2)?;
        w.write_u32::<LittleEndian>(total as u32)?;

        w.write_u32::<LittleEndian>((json.len() + json_padding) as u32)?;
        w.write_u32::<LittleEndian>(FOURCC_CHUNK_JSON)?;
        w.write_all(json.as_bytes())?;
        for _ in 0..json_padding {
            w.write_u8(b' ')?;
        }

        if let Some(bin) = bin {
            w.write_u32::<LittleEndian>((bin.len() + bin_padding) as u32)?;
            w.write_u32::<LittleEndian>(FOURCC_CHUNK_BIN)?;
            w.write_all(bin)?;
            for _ in 0..bin_padding {
                w.write_u8(0)?;
            }
        }

        Ok(())
    }

    fn padding(length: usize) -> usize {
        (4 - length % 4) % 4
    }
}
