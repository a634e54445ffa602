use crate::FormatError;

/// "glTF", little-endian.
pub const FOURCC_GLB: u32 = 0x46546C67;
/// "JSON" chunk type of the version 2 container.
pub const FOURCC_CHUNK_JSON: u32 = 0x4E4F534A;
/// "BIN\0" chunk type of the version 2 container.
pub const FOURCC_CHUNK_BIN: u32 = 0x004E4942;
/// The only content format the version 1 container ever defined.
pub const V1_CONTENT_FORMAT_JSON: u32 = 0;

pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Copy, Clone)]
pub struct GlbHeader {
    pub version: u32,
    /// Total container length as declared by the header, which may disagree
    /// with the actual buffer length (see [`crate::glb::reader::GlbReader`]).
    pub declared_length: u32,
}

/// The embedded binary body of a container: chunk 0 of version 2, or the
/// untyped trailer of version 1. Reads are range-checked, never panicking.
#[derive(Debug, Clone)]
pub struct BinaryBody {
    data: Vec<u8>,
}

impl BinaryBody {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn total_length(&self) -> usize {
        self.data.len()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn read(&self, offset: usize, length: usize) -> Result<&[u8], FormatError> {
        if offset.checked_add(length).is_none_or(|end| end > self.data.len()) {
            return Err(FormatError::OutOfRange {
                offset,
                length,
                available: self.data.len(),
            });
        }
        Ok(&self.data[offset..offset + length])
    }
}

/// The unpacked container: the JSON document text plus the optional binary body.
#[derive(Debug)]
pub struct Glb {
    pub header: GlbHeader,
    pub json: String,
    pub bin: Option<BinaryBody>,
}
