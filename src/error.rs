//! Error types for kindling operations.

use thiserror::Error;

/// Errors that can occur while decoding or encoding a Mobipocket container.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported magic in {location}: {seen:02x?}")]
    UnsupportedMagic {
        location: &'static str,
        seen: Vec<u8>,
    },

    #[error("unsupported compression scheme: {0}")]
    UnsupportedCompression(u16),

    #[error("unsupported encryption scheme: {0}")]
    UnsupportedEncryption(u16),

    #[error("unsupported text encoding: {0}")]
    UnsupportedTextEncoding(u32),

    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("corrupt font record: {0}")]
    CorruptFont(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Magic-mismatch constructor used by the record parsers.
    pub(crate) fn bad_magic(location: &'static str, seen: &[u8]) -> Self {
        Error::UnsupportedMagic {
            location,
            seen: seen.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
