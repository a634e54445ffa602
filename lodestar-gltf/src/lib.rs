use thiserror::Error;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("The container's magic value does not match the expectation: {magic:#010X}")]
    InvalidMagicValue { magic: u32 },

    #[error("Unsupported container version {version}")]
    UnsupportedVersion { version: u32 },

    #[error("The container is violating the expected format, because: {reason}")]
    FormatViolation { reason: &'static str },

    #[error("Read of {length} bytes at offset {offset} runs past the end of the buffer ({available} bytes)")]
    OutOfRange {
        offset: usize,
        length: usize,
        available: usize,
    },

    #[error("Invalid JSON document: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UTF8ConversationError(#[from] std::string::FromUtf8Error),
}

pub mod document;
pub mod glb;
