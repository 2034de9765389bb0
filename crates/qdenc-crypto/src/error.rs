use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Every failure is fatal to the operation that raised it; nothing is retried.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("not a QDENC container: magic tag missing")]
    Format,

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported KDF id {0}")]
    UnsupportedKdf(u8),

    #[error("chunk order mismatch: expected index {expected}, found {found}")]
    Order { expected: u32, found: u32 },

    #[error("authentication failed: {0}")]
    Integrity(String),

    #[error("incomplete data: expected {expected} bytes, only {available} available")]
    IncompleteData { expected: u64, available: u64 },

    #[error("decrypted size exceeds limit of {limit} bytes")]
    SizeLimit { limit: u64 },

    #[error("encryption failed: {0}")]
    Seal(String),

    #[error("malformed container: {0}")]
    Malformed(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid share token: {0}")]
    InvalidToken(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
