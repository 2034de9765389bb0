//! Container size prediction

use serde::Serialize;

use crate::chunk::RECORD_FRAMING_LEN;
use crate::error::CryptoResult;
use crate::format::{chunk_count, header_len};
use crate::stream::EncryptOptions;
use crate::TAG_SIZE;

/// Bytes a container adds on top of the plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverheadEstimate {
    /// header_bytes + per_chunk_overhead * total_chunks + tag_overhead
    pub overhead: u64,
    pub header_bytes: u64,
    /// index + nonceLen + nonce + cipherLen, excluding the tag
    pub per_chunk_overhead: u64,
    /// 16 bytes per chunk
    pub tag_overhead: u64,
    pub total_chunks: u32,
}

/// Predict the exact overhead [`crate::encrypt`] will add for `plaintext_size` bytes.
///
/// Only `chunk_size` and the salt length of `options` matter.
pub fn estimate_overhead(
    plaintext_size: u64,
    options: &EncryptOptions,
) -> CryptoResult<OverheadEstimate> {
    options.validate()?;
    let total_chunks = chunk_count(plaintext_size, options.chunk_size)?;
    let header_bytes = header_len(options.effective_salt_len()) as u64;
    let per_chunk_overhead = RECORD_FRAMING_LEN as u64;
    let tag_overhead = TAG_SIZE as u64 * u64::from(total_chunks);

    Ok(OverheadEstimate {
        overhead: header_bytes + per_chunk_overhead * u64::from(total_chunks) + tag_overhead,
        header_bytes,
        per_chunk_overhead,
        tag_overhead,
        total_chunks,
    })
}
