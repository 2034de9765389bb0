//! Per-chunk AES-256-GCM sealing and chunk record framing
//!
//! Chunk record format (binary, integers big-endian):
//! ```text
//! [4 bytes: index][1 byte: nonceLen = 12][12 bytes: random nonce]
//! [4 bytes: cipherLen][cipherLen bytes: ciphertext || 16-byte GCM tag]
//! AAD = "QDENC" || version || UTF-8(file_id) || index (4 bytes BE) || total_chunks (4 bytes BE)
//! ```
//!
//! The AAD binds each chunk to its file, its position, and the chunk count,
//! so reordering, cross-file substitution, and re-labelled truncation all fail
//! authentication. The tag is the trailing 16 bytes of the AEAD output; there
//! is no separate tag field.

use aes_gcm::{
    aead::{Aead, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::format::{be_u32, MAGIC, VERSION};
use crate::source::ByteSource;
use crate::{NONCE_SIZE, TAG_SIZE};

/// index + nonceLen + nonce + cipherLen; excludes the tag carried in the ciphertext
pub const RECORD_FRAMING_LEN: usize = 4 + 1 + NONCE_SIZE + 4;

/// One framed, encrypted chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub index: u32,
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD output: encrypted segment followed by the tag
    pub ciphertext: Vec<u8>,
}

impl ChunkRecord {
    pub fn encoded_len(&self) -> usize {
        RECORD_FRAMING_LEN + self.ciphertext.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.index.to_be_bytes());
        out.push(NONCE_SIZE as u8);
        out.extend_from_slice(&self.nonce);
        // seal_chunk refuses segments whose ciphertext would not fit in u32
        out.extend_from_slice(&(self.ciphertext.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.ciphertext);
        out
    }
}

/// The fixed-size part of a chunk record, read before the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFrame {
    pub index: u32,
    pub nonce: [u8; NONCE_SIZE],
    pub cipher_len: u32,
}

impl RecordFrame {
    /// Read the record framing at `offset`.
    ///
    /// Any shortfall is [`CryptoError::IncompleteData`]; a nonce length other
    /// than 12 or a ciphertext shorter than the tag is [`CryptoError::Malformed`].
    pub fn read<S: ByteSource + ?Sized>(source: &S, offset: u64) -> CryptoResult<Self> {
        let buf = source.read_range(offset, offset + RECORD_FRAMING_LEN as u64)?;
        if buf.len() < 5 {
            return Err(incomplete(RECORD_FRAMING_LEN, buf.len()));
        }
        let index = be_u32(&buf[0..4]);
        let nonce_len = buf[4] as usize;
        if nonce_len != NONCE_SIZE {
            return Err(CryptoError::Malformed(format!(
                "chunk {index}: nonce length {nonce_len}, expected {NONCE_SIZE}"
            )));
        }
        if buf.len() < RECORD_FRAMING_LEN {
            return Err(incomplete(RECORD_FRAMING_LEN, buf.len()));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[5..5 + NONCE_SIZE]);
        let cipher_len = be_u32(&buf[5 + NONCE_SIZE..RECORD_FRAMING_LEN]);
        if (cipher_len as usize) < TAG_SIZE {
            return Err(CryptoError::Malformed(format!(
                "chunk {index}: ciphertext length {cipher_len} shorter than tag"
            )));
        }

        Ok(Self {
            index,
            nonce,
            cipher_len,
        })
    }

    /// Plaintext bytes this record will decrypt to.
    pub fn plaintext_len(&self) -> u64 {
        u64::from(self.cipher_len) - TAG_SIZE as u64
    }

    /// Total encoded length of the record including the ciphertext.
    pub fn record_len(&self) -> u64 {
        RECORD_FRAMING_LEN as u64 + u64::from(self.cipher_len)
    }

    /// Read the ciphertext following this frame, which starts at `offset`.
    pub fn read_body<S: ByteSource + ?Sized>(
        self,
        source: &S,
        offset: u64,
    ) -> CryptoResult<ChunkRecord> {
        let start = offset + RECORD_FRAMING_LEN as u64;
        let ciphertext = source.read_range(start, start + u64::from(self.cipher_len))?;
        if ciphertext.len() < self.cipher_len as usize {
            return Err(incomplete(self.cipher_len as usize, ciphertext.len()));
        }
        Ok(ChunkRecord {
            index: self.index,
            nonce: self.nonce,
            ciphertext,
        })
    }
}

/// Build AAD: magic || version || file_id || chunk_index (4 bytes BE) || total_chunks (4 bytes BE)
pub fn build_aad(file_id: &str, chunk_index: u32, total_chunks: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(MAGIC.len() + 1 + file_id.len() + 8);
    aad.extend_from_slice(&MAGIC);
    aad.push(VERSION);
    aad.extend_from_slice(file_id.as_bytes());
    aad.extend_from_slice(&chunk_index.to_be_bytes());
    aad.extend_from_slice(&total_chunks.to_be_bytes());
    aad
}

/// Encrypt one plaintext segment under a fresh random nonce.
pub fn seal_chunk(
    cipher: &Aes256Gcm,
    file_id: &str,
    chunk_index: u32,
    total_chunks: u32,
    plaintext: &[u8],
) -> CryptoResult<ChunkRecord> {
    if plaintext.len() > (u32::MAX as usize) - TAG_SIZE {
        return Err(CryptoError::InvalidOptions(format!(
            "chunk {chunk_index}: segment of {} bytes overflows the record length field",
            plaintext.len()
        )));
    }

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    let aad = build_aad(file_id, chunk_index, total_chunks);

    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::Seal(format!("chunk {chunk_index}: {e}")))?;

    Ok(ChunkRecord {
        index: chunk_index,
        nonce,
        ciphertext,
    })
}

/// Authenticate and decrypt one record. The record's position is taken from
/// `record.index`; callers check it against the expected index first.
pub fn open_chunk(
    cipher: &Aes256Gcm,
    file_id: &str,
    total_chunks: u32,
    record: &ChunkRecord,
) -> CryptoResult<Vec<u8>> {
    let aad = build_aad(file_id, record.index, total_chunks);
    cipher
        .decrypt(
            Nonce::from_slice(&record.nonce),
            Payload {
                msg: &record.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| {
            CryptoError::Integrity(format!(
                "chunk {}: wrong password, corrupted data, or mismatched file id/position",
                record.index
            ))
        })
}

fn incomplete(expected: usize, available: usize) -> CryptoError {
    CryptoError::IncompleteData {
        expected: expected as u64,
        available: available as u64,
    }
}
