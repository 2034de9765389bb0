//! qdenc-crypto: streaming authenticated-encryption container engine
//!
//! Container layout (all integers big-endian, unsigned):
//! ```text
//! Header:  "QDENC" | version(1) | flags(1) | kdfId(1) | saltLen(1) | salt | iterations(4) | totalChunks(4) | plaintextSize(8)
//! Record:  index(4) | nonceLen(1) | nonce(12) | cipherLen(4) | ciphertext || tag(16)
//! AAD:     "QDENC" | version | UTF-8(fileId) | index(4) | totalChunks(4)
//! ```
//!
//! Key hierarchy:
//! ```text
//! File password ──PBKDF2-SHA256(salt, iterations)──▶ AES-256-GCM chunk key
//! Share secret  ──PBKDF2-SHA256(publicId, 300000)──▶ KEK ──wraps──▶ file password
//! ```

pub mod chunk;
pub mod error;
pub mod format;
pub mod kdf;
pub mod overhead;
pub mod share;
pub mod source;
pub mod stream;

pub use error::{CryptoError, CryptoResult};
pub use format::{detect_format, read_header, ContainerFormat, FormatInfo, Header};
pub use kdf::{derive_key, DerivedKey, KdfId};
pub use overhead::{estimate_overhead, OverheadEstimate};
pub use share::{unwrap_secret, wrap_secret, ShareRecord, ShareToken, WrappedSecret};
pub use source::{ByteSource, FileSource};
pub use stream::{
    decrypt, decrypt_to_vec, encrypt, DecryptOptions, DecryptStream, DecryptedContainer,
    EncryptOptions, EncryptStream, EncryptedContainer, PlainChunk, Segment,
};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
