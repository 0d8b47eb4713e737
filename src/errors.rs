use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SGError
{
    #[error("grid point is already stored at sequence number {seq}")]
    DuplicateKey { seq: usize },
    #[error("sequence number {seq} is out of range for storage of size {len}")]
    OutOfRange { seq: usize, len: usize },
    #[error("expected a vector of length {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("expected dimensionality {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("level/index pair is not a valid grid point")]
    InvalidGridPoint,
    #[error("inconsistent storage: {0}")]
    InconsistentStorage(String),
    #[error("operation requires a non-empty storage")]
    EmptyStorage,
    #[error("unsupported serialization version {0}")]
    UnsupportedVersion(u32),
    #[error("failed to parse grid description: {0}")]
    ParseError(String),
    #[error("serialization failed")]
    SerializationFailed,
    #[error("deserialization failed")]
    DeserializationFailed,
    #[error("lz4 decompression failed")]
    LZ4DecompressionFailed,
    #[error("file i/o failed")]
    FileIOError,
}
