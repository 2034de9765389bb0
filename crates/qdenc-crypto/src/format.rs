//! Container header codec and format sniffing
//!
//! Header format (binary, integers big-endian):
//! ```text
//! [5 bytes: "QDENC"][1: version][1: flags][1: kdfId][1: saltLen][saltLen: salt]
//! [4: iterations][4: totalChunks][8: plaintextSize]
//! ```
//!
//! The header length is fully determined by `saltLen`, which sits inside the
//! variable-length region. [`read_header`] therefore reads the fixed prefix
//! first, then re-reads the whole header once the salt length is known.

use serde::Serialize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::KdfId;
use crate::source::ByteSource;

/// Format family tag
pub const MAGIC: [u8; 5] = *b"QDENC";

/// The one container revision this engine reads and writes
pub const VERSION: u8 = 0x02;

/// Flags byte; reserved, always written as zero
pub const FLAGS_NONE: u8 = 0x00;

/// magic + version + flags + kdfId + saltLen
pub const HEADER_PREFIX_LEN: usize = MAGIC.len() + 4;

/// iterations + totalChunks + plaintextSize
pub const HEADER_SUFFIX_LEN: usize = 4 + 4 + 8;

/// Version reported by [`detect_format`] for input without the magic tag
pub const LEGACY_VERSION: u8 = 1;

/// A parsed container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub flags: u8,
    pub kdf_id: u8,
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub total_chunks: u32,
    pub plaintext_size: u64,
    /// Serialized header length; the first chunk record starts here.
    pub header_len: usize,
}

/// Serialized header length for a given salt length.
pub const fn header_len(salt_len: usize) -> usize {
    HEADER_PREFIX_LEN + salt_len + HEADER_SUFFIX_LEN
}

/// Number of chunk records for `plaintext_len` bytes: `max(1, ceil(len / chunk_size))`.
///
/// Even an empty input produces one (empty) chunk.
pub fn chunk_count(plaintext_len: u64, chunk_size: usize) -> CryptoResult<u32> {
    if chunk_size == 0 {
        return Err(CryptoError::InvalidOptions("chunk size must be non-zero".into()));
    }
    let count = plaintext_len.div_ceil(chunk_size as u64).max(1);
    u32::try_from(count).map_err(|_| {
        CryptoError::InvalidOptions(format!(
            "{plaintext_len} bytes at chunk size {chunk_size} needs {count} chunks (limit {})",
            u32::MAX
        ))
    })
}

/// Serialize a header. `saltLen` is taken from `salt.len()`.
pub fn build_header(
    salt: &[u8],
    iterations: u32,
    total_chunks: u32,
    plaintext_size: u64,
    kdf_id: KdfId,
) -> CryptoResult<Vec<u8>> {
    let salt_len = u8::try_from(salt.len())
        .ok()
        .filter(|len| *len > 0)
        .ok_or_else(|| {
            CryptoError::InvalidOptions(format!(
                "salt length must be in 1..=255, got {}",
                salt.len()
            ))
        })?;

    let mut header = Vec::with_capacity(header_len(salt.len()));
    header.extend_from_slice(&MAGIC);
    header.push(VERSION);
    header.push(FLAGS_NONE);
    header.push(kdf_id.into());
    header.push(salt_len);
    header.extend_from_slice(salt);
    header.extend_from_slice(&iterations.to_be_bytes());
    header.extend_from_slice(&total_chunks.to_be_bytes());
    header.extend_from_slice(&plaintext_size.to_be_bytes());
    Ok(header)
}

/// Parse and validate the container header at the start of `source`.
///
/// Fails with [`CryptoError::Format`] when the magic tag is absent and
/// [`CryptoError::UnsupportedVersion`] for any version other than [`VERSION`].
/// The KDF id is returned as-is; the decrypt pipeline decides whether it is supported.
pub fn read_header<S: ByteSource + ?Sized>(source: &S) -> CryptoResult<Header> {
    let prefix = source.read_range(0, HEADER_PREFIX_LEN as u64)?;
    if prefix.len() < MAGIC.len() || prefix[..MAGIC.len()] != MAGIC {
        return Err(CryptoError::Format);
    }
    let version = *prefix.get(5).ok_or(CryptoError::IncompleteData {
        expected: HEADER_PREFIX_LEN as u64,
        available: prefix.len() as u64,
    })?;
    if version != VERSION {
        return Err(CryptoError::UnsupportedVersion(version));
    }
    if prefix.len() < HEADER_PREFIX_LEN {
        return Err(CryptoError::IncompleteData {
            expected: HEADER_PREFIX_LEN as u64,
            available: prefix.len() as u64,
        });
    }

    let flags = prefix[6];
    let kdf_id = prefix[7];
    let salt_len = prefix[8] as usize;
    let needed = header_len(salt_len);

    let buf = source.read_range(0, needed as u64)?;
    if buf.len() < needed {
        return Err(CryptoError::IncompleteData {
            expected: needed as u64,
            available: buf.len() as u64,
        });
    }

    let mut offset = HEADER_PREFIX_LEN;
    let salt = buf[offset..offset + salt_len].to_vec();
    offset += salt_len;
    let iterations = be_u32(&buf[offset..offset + 4]);
    offset += 4;
    let total_chunks = be_u32(&buf[offset..offset + 4]);
    offset += 4;
    let plaintext_size = be_u64(&buf[offset..offset + 8]);

    if salt_len == 0 {
        return Err(CryptoError::Malformed("empty salt".into()));
    }
    if iterations == 0 {
        return Err(CryptoError::Malformed("zero KDF iterations".into()));
    }
    if total_chunks == 0 {
        return Err(CryptoError::Malformed("header declares zero chunks".into()));
    }

    Ok(Header {
        version,
        flags,
        kdf_id,
        salt,
        iterations,
        total_chunks,
        plaintext_size,
        header_len: needed,
    })
}

/// Coarse classification of a byte source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// No magic tag: plain or pre-container data
    Legacy,
    /// Magic tag with the supported version
    V2,
    /// Magic tag with a version this engine does not read
    Unknown,
}

/// Result of [`detect_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatInfo {
    pub version: u8,
    pub format: ContainerFormat,
    pub has_magic: bool,
}

/// Sniff the first 6 bytes (magic + version) without parsing the full header.
pub fn detect_format<S: ByteSource + ?Sized>(source: &S) -> CryptoResult<FormatInfo> {
    let head = source.read_range(0, MAGIC.len() as u64 + 1)?;
    let has_magic = head.len() > MAGIC.len() && head[..MAGIC.len()] == MAGIC;
    if !has_magic {
        return Ok(FormatInfo {
            version: LEGACY_VERSION,
            format: ContainerFormat::Legacy,
            has_magic: false,
        });
    }

    let version = head[MAGIC.len()];
    let format = if version == VERSION {
        ContainerFormat::V2
    } else {
        ContainerFormat::Unknown
    };
    Ok(FormatInfo {
        version,
        format,
        has_magic,
    })
}

pub(crate) fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

fn be_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}
