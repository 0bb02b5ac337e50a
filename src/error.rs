use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = ProfileError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("failed to write profile to {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("a section name is required to modify a profile")]
    MissingSection,
    #[error("key not found")]
    NotFound,
    #[error(transparent)]
    Struct(#[from] StructError),
}

#[derive(Debug, Error)]
pub enum StructError {
    #[error("struct value holds {actual} bytes, expected {expected}")]
    Length { expected: usize, actual: usize },
    #[error("invalid hex in struct value")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("struct checksum mismatch: stored {stored:02X}, computed {computed:02X}")]
    Checksum { stored: u8, computed: u8 },
}
