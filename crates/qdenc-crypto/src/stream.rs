//! Streaming encrypt/decrypt pipelines
//!
//! Both directions are pull-based iterators: each call to `next()` reads,
//! seals or opens, and frames exactly one chunk. Nothing is processed ahead of
//! demand, so dropping a stream cancels the operation and memory stays bounded
//! by the chunk size regardless of input length.
//!
//! Records are produced and consumed in strictly increasing index order. A
//! stream yields `None` after its first error.

use std::io::Write;
use std::iter::FusedIterator;

use aes_gcm::{Aes256Gcm, KeyInit};
use qdenc_core::config::{
    CryptoConfig, DEFAULT_CHUNK_SIZE, DEFAULT_ITERATIONS, DEFAULT_SALT_LEN, MAX_CHUNK_SIZE,
};
use secrecy::SecretString;
use tracing::{debug, trace, warn};

use crate::chunk::{open_chunk, seal_chunk, RecordFrame};
use crate::error::{CryptoError, CryptoResult};
use crate::format::{build_header, chunk_count, read_header, Header};
use crate::kdf::{derive_key, generate_salt, KdfId};
use crate::source::ByteSource;

/// Options for [`encrypt`]. Checked by [`EncryptOptions::validate`] before any work is done.
#[derive(Debug, Clone)]
pub struct EncryptOptions {
    /// Plaintext bytes per chunk (default: 1 MiB)
    pub chunk_size: usize,
    /// Caller-supplied file identity bound into every chunk's AAD (default: empty)
    pub file_id: String,
    /// PBKDF2 iterations (default: 300000)
    pub iterations: u32,
    /// Length of the generated salt when `salt` is `None` (default: 32)
    pub salt_len: usize,
    /// Explicit salt; a fresh random salt is drawn per encryption when unset
    pub salt: Option<Vec<u8>>,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            file_id: String::new(),
            iterations: DEFAULT_ITERATIONS,
            salt_len: DEFAULT_SALT_LEN,
            salt: None,
        }
    }
}

impl EncryptOptions {
    pub fn from_config(config: &CryptoConfig) -> CryptoResult<Self> {
        config
            .validate()
            .map_err(|e| CryptoError::InvalidOptions(e.to_string()))?;
        Ok(Self {
            chunk_size: config.chunk_size,
            iterations: config.iterations,
            salt_len: config.salt_len,
            ..Self::default()
        })
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }

    /// Salt length that will be written to the header.
    pub fn effective_salt_len(&self) -> usize {
        self.salt.as_ref().map_or(self.salt_len, Vec::len)
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(CryptoError::InvalidOptions(format!(
                "chunk size must be in 1..={MAX_CHUNK_SIZE}, got {}",
                self.chunk_size
            )));
        }
        if self.iterations == 0 {
            return Err(CryptoError::InvalidOptions(
                "iterations must be at least 1".into(),
            ));
        }
        let salt_len = self.effective_salt_len();
        if !(1..=255).contains(&salt_len) {
            return Err(CryptoError::InvalidOptions(format!(
                "salt length must be in 1..=255, got {salt_len}"
            )));
        }
        Ok(())
    }
}

/// Options for [`decrypt`].
#[derive(Debug, Clone, Default)]
pub struct DecryptOptions {
    /// Must match the file id used at encryption time
    pub file_id: String,
    /// Abort with [`CryptoError::SizeLimit`] before decrypting past this many bytes
    pub max_plaintext_bytes: Option<u64>,
}

impl DecryptOptions {
    pub fn from_config(config: &CryptoConfig) -> Self {
        Self {
            file_id: String::new(),
            max_plaintext_bytes: config.max_plaintext_bytes,
        }
    }

    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = file_id.into();
        self
    }
}

/// One element of an encrypted stream: the header first, then chunk records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Header(Vec<u8>),
    Chunk { index: u32, data: Vec<u8> },
}

impl Segment {
    pub fn data(&self) -> &[u8] {
        match self {
            Segment::Header(data) | Segment::Chunk { data, .. } => data,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Segment::Header(data) | Segment::Chunk { data, .. } => data,
        }
    }
}

/// Result of [`encrypt`]: header metadata plus the lazy record stream.
pub struct EncryptedContainer<S> {
    /// Serialized header (also the first element of `stream`)
    pub header: Vec<u8>,
    pub total_chunks: u32,
    pub plaintext_size: u64,
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub kdf_id: KdfId,
    pub stream: EncryptStream<S>,
}

/// Lazy sequence of [`Segment`]s for one encryption.
pub struct EncryptStream<S> {
    source: S,
    cipher: Aes256Gcm,
    file_id: String,
    chunk_size: usize,
    total_chunks: u32,
    plaintext_size: u64,
    header: Option<Vec<u8>>,
    next_index: u32,
    done: bool,
}

/// Encrypt `source` under `password`.
///
/// The key is derived once up front; chunks are encrypted only as the returned
/// stream is pulled.
pub fn encrypt<S: ByteSource>(
    source: S,
    password: &SecretString,
    options: &EncryptOptions,
) -> CryptoResult<EncryptedContainer<S>> {
    options.validate()?;

    let plaintext_size = source.len();
    let total_chunks = chunk_count(plaintext_size, options.chunk_size)?;
    let salt = match &options.salt {
        Some(salt) => salt.clone(),
        None => generate_salt(options.salt_len),
    };
    let kdf_id = KdfId::Pbkdf2Sha256;
    let header = build_header(&salt, options.iterations, total_chunks, plaintext_size, kdf_id)?;

    let cipher = {
        let key = derive_key(password, &salt, options.iterations);
        Aes256Gcm::new(key.as_bytes().into())
    };

    debug!(
        plaintext_size,
        total_chunks,
        chunk_size = options.chunk_size,
        iterations = options.iterations,
        file_id = %options.file_id,
        "encrypting container"
    );

    let stream = EncryptStream {
        source,
        cipher,
        file_id: options.file_id.clone(),
        chunk_size: options.chunk_size,
        total_chunks,
        plaintext_size,
        header: Some(header.clone()),
        next_index: 0,
        done: false,
    };

    Ok(EncryptedContainer {
        header,
        total_chunks,
        plaintext_size,
        salt,
        iterations: options.iterations,
        kdf_id,
        stream,
    })
}

impl<S: ByteSource> EncryptStream<S> {
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Drain the stream into `writer`, returning the number of bytes written.
    pub fn write_to<W: Write>(self, writer: &mut W) -> CryptoResult<u64> {
        let mut written = 0u64;
        for segment in self {
            let segment = segment?;
            writer.write_all(segment.data())?;
            written += segment.data().len() as u64;
        }
        Ok(written)
    }

    fn next_chunk(&mut self) -> CryptoResult<Segment> {
        let index = self.next_index;
        let start = u64::from(index) * self.chunk_size as u64;
        let end = (start + self.chunk_size as u64).min(self.plaintext_size);

        let plaintext = self.source.read_range(start, end)?;
        if (plaintext.len() as u64) < end - start {
            return Err(CryptoError::IncompleteData {
                expected: end - start,
                available: plaintext.len() as u64,
            });
        }

        let record = seal_chunk(
            &self.cipher,
            &self.file_id,
            index,
            self.total_chunks,
            &plaintext,
        )?;
        trace!(index, plaintext_len = plaintext.len(), "sealed chunk");

        self.next_index += 1;
        Ok(Segment::Chunk {
            index,
            data: record.encode(),
        })
    }
}

impl<S: ByteSource> Iterator for EncryptStream<S> {
    type Item = CryptoResult<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(header) = self.header.take() {
            return Some(Ok(Segment::Header(header)));
        }
        if self.next_index >= self.total_chunks {
            self.done = true;
            return None;
        }

        let result = self.next_chunk();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

impl<S: ByteSource> FusedIterator for EncryptStream<S> {}

/// One decrypted plaintext segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainChunk {
    pub index: u32,
    pub data: Vec<u8>,
}

/// Result of [`decrypt`]: the validated header plus the lazy plaintext stream.
pub struct DecryptedContainer<S> {
    pub header: Header,
    pub stream: DecryptStream<S>,
}

/// Lazy sequence of [`PlainChunk`]s for one decryption.
pub struct DecryptStream<S> {
    source: S,
    cipher: Aes256Gcm,
    file_id: String,
    total_chunks: u32,
    plaintext_size: u64,
    max_plaintext_bytes: Option<u64>,
    offset: u64,
    next_index: u32,
    produced: u64,
    done: bool,
}

/// Decrypt a container read from `source`.
///
/// The header is validated (magic, version, KDF id) and the key derived before
/// this returns; chunks are authenticated and decrypted only as the stream is pulled.
pub fn decrypt<S: ByteSource>(
    source: S,
    password: &SecretString,
    options: &DecryptOptions,
) -> CryptoResult<DecryptedContainer<S>> {
    let header = read_header(&source)?;
    KdfId::try_from(header.kdf_id)?;

    let cipher = {
        let key = derive_key(password, &header.salt, header.iterations);
        Aes256Gcm::new(key.as_bytes().into())
    };

    debug!(
        total_chunks = header.total_chunks,
        plaintext_size = header.plaintext_size,
        iterations = header.iterations,
        file_id = %options.file_id,
        "decrypting container"
    );

    let stream = DecryptStream {
        source,
        cipher,
        file_id: options.file_id.clone(),
        total_chunks: header.total_chunks,
        plaintext_size: header.plaintext_size,
        max_plaintext_bytes: options.max_plaintext_bytes,
        offset: header.header_len as u64,
        next_index: 0,
        produced: 0,
        done: false,
    };

    Ok(DecryptedContainer { header, stream })
}

/// Decrypt a whole container and reassemble the chunks in order.
pub fn decrypt_to_vec<S: ByteSource>(
    source: S,
    password: &SecretString,
    options: &DecryptOptions,
) -> CryptoResult<Vec<u8>> {
    let container = decrypt(source, password, options)?;
    let mut out = Vec::new();
    for chunk in container.stream {
        out.extend_from_slice(&chunk?.data);
    }
    Ok(out)
}

impl<S: ByteSource> DecryptStream<S> {
    /// Plaintext bytes yielded so far.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// Drain the stream into `writer`, returning the number of plaintext bytes written.
    pub fn write_to<W: Write>(self, writer: &mut W) -> CryptoResult<u64> {
        let mut written = 0u64;
        for chunk in self {
            let chunk = chunk?;
            writer.write_all(&chunk.data)?;
            written += chunk.data.len() as u64;
        }
        Ok(written)
    }

    fn next_chunk(&mut self) -> CryptoResult<PlainChunk> {
        let expected = self.next_index;
        let frame = RecordFrame::read(&self.source, self.offset)?;
        if frame.index != expected {
            warn!(expected, found = frame.index, "chunk order mismatch");
            return Err(CryptoError::Order {
                expected,
                found: frame.index,
            });
        }

        if let Some(limit) = self.max_plaintext_bytes {
            if self.produced + frame.plaintext_len() > limit {
                debug!(limit, produced = self.produced, "decrypted size limit reached");
                return Err(CryptoError::SizeLimit { limit });
            }
        }

        let record = frame.read_body(&self.source, self.offset)?;
        let data = open_chunk(&self.cipher, &self.file_id, self.total_chunks, &record)
            .inspect_err(|_| warn!(index = expected, "chunk authentication failed"))?;

        self.offset += frame.record_len();
        self.produced += data.len() as u64;
        self.next_index += 1;

        if self.next_index == self.total_chunks && self.produced != self.plaintext_size {
            warn!(
                declared = self.plaintext_size,
                actual = self.produced,
                "plaintext size mismatch"
            );
            return Err(CryptoError::Integrity(format!(
                "header declares {} plaintext bytes, chunks decrypted to {}",
                self.plaintext_size, self.produced
            )));
        }

        trace!(index = expected, plaintext_len = data.len(), "opened chunk");
        Ok(PlainChunk {
            index: expected,
            data,
        })
    }
}

impl<S: ByteSource> Iterator for DecryptStream<S> {
    type Item = CryptoResult<PlainChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.next_index >= self.total_chunks {
            self.done = true;
            return None;
        }

        let result = self.next_chunk();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

impl<S: ByteSource> FusedIterator for DecryptStream<S> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options(chunk_size: usize) -> EncryptOptions {
        EncryptOptions {
            chunk_size,
            iterations: 1000,
            ..EncryptOptions::default()
        }
    }

    fn encrypt_to_vec(data: &[u8], password: &str, options: &EncryptOptions) -> Vec<u8> {
        let container = encrypt(data, &SecretString::from(password), options).unwrap();
        let mut out = Vec::new();
        container.stream.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_stream_starts_with_header() {
        let data = vec![7u8; 100];
        let container =
            encrypt(data.as_slice(), &SecretString::from("pw"), &fast_options(64)).unwrap();
        assert_eq!(container.total_chunks, 2);
        assert_eq!(container.plaintext_size, 100);
        assert_eq!(container.salt.len(), 32);
        assert_eq!(container.kdf_id, KdfId::Pbkdf2Sha256);

        let header = container.header.clone();
        let segments: Vec<Segment> = container.stream.map(Result::unwrap).collect();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], Segment::Header(header));
        assert!(matches!(segments[1], Segment::Chunk { index: 0, .. }));
        assert!(matches!(segments[2], Segment::Chunk { index: 1, .. }));
    }

    #[test]
    fn test_roundtrip_small() {
        let data = b"the quick brown fox jumps over the lazy dog".to_vec();
        let encrypted = encrypt_to_vec(&data, "correct horse", &fast_options(8));
        let decrypted = decrypt_to_vec(
            encrypted.as_slice(),
            &SecretString::from("correct horse"),
            &DecryptOptions::default(),
        )
        .unwrap();
        assert_eq!(decrypted, data);
    }

    #[test]
    fn test_empty_input_emits_one_chunk() {
        let container =
            encrypt(&b""[..], &SecretString::from("pw"), &fast_options(1024)).unwrap();
        assert_eq!(container.total_chunks, 1);
        let segments: Vec<_> = container.stream.collect::<Result<_, _>>().unwrap();
        assert_eq!(segments.len(), 2);

        let encrypted: Vec<u8> = segments.into_iter().flat_map(Segment::into_bytes).collect();
        let decrypted =
            decrypt_to_vec(encrypted.as_slice(), &SecretString::from("pw"), &DecryptOptions::default())
                .unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_explicit_salt_used() {
        let options = EncryptOptions {
            salt: Some(vec![3u8; 16]),
            ..fast_options(64)
        };
        let encrypted = encrypt_to_vec(b"data", "pw", &options);
        let header = read_header(encrypted.as_slice()).unwrap();
        assert_eq!(header.salt, vec![3u8; 16]);
        assert_eq!(header.iterations, 1000);
    }

    #[test]
    fn test_random_salt_per_encryption() {
        let a = encrypt(&b"x"[..], &SecretString::from("pw"), &fast_options(64)).unwrap();
        let b = encrypt(&b"x"[..], &SecretString::from("pw"), &fast_options(64)).unwrap();
        assert_ne!(a.salt, b.salt);
    }

    #[test]
    fn test_invalid_options_rejected() {
        let pw = SecretString::from("pw");
        for options in [
            fast_options(0),
            EncryptOptions {
                iterations: 0,
                ..fast_options(64)
            },
            EncryptOptions {
                salt_len: 0,
                ..fast_options(64)
            },
            EncryptOptions {
                salt: Some(vec![0u8; 300]),
                ..fast_options(64)
            },
        ] {
            assert!(matches!(
                encrypt(&b"x"[..], &pw, &options),
                Err(CryptoError::InvalidOptions(_))
            ));
        }
    }

    #[test]
    fn test_options_from_config() {
        let config = CryptoConfig {
            chunk_size: 4096,
            iterations: 10,
            salt_len: 16,
            max_plaintext_bytes: Some(99),
        };
        let enc = EncryptOptions::from_config(&config).unwrap().with_file_id("a.bin");
        assert_eq!(enc.chunk_size, 4096);
        assert_eq!(enc.iterations, 10);
        assert_eq!(enc.effective_salt_len(), 16);
        assert_eq!(enc.file_id, "a.bin");

        let dec = DecryptOptions::from_config(&config);
        assert_eq!(dec.max_plaintext_bytes, Some(99));

        let bad = CryptoConfig {
            chunk_size: 0,
            ..config
        };
        assert!(EncryptOptions::from_config(&bad).is_err());
    }

    #[test]
    fn test_stream_fuses_after_error() {
        let mut encrypted = encrypt_to_vec(&[1u8; 40], "pw", &fast_options(10));
        let header_len = read_header(encrypted.as_slice()).unwrap().header_len;
        // corrupt the first chunk's ciphertext
        encrypted[header_len + 21] ^= 0x01;

        let mut stream = decrypt(encrypted.as_slice(), &SecretString::from("pw"), &DecryptOptions::default())
            .unwrap()
            .stream;
        assert!(matches!(stream.next(), Some(Err(CryptoError::Integrity(_)))));
        assert!(stream.next().is_none());
        assert!(stream.next().is_none());
    }

    #[test]
    fn test_decrypt_rejects_unknown_kdf() {
        let mut encrypted = encrypt_to_vec(b"data", "pw", &fast_options(64));
        encrypted[7] = 9;
        let result = decrypt(encrypted.as_slice(), &SecretString::from("pw"), &DecryptOptions::default());
        assert!(matches!(result, Err(CryptoError::UnsupportedKdf(9))));
    }

    #[test]
    fn test_decrypt_progress_counter() {
        let encrypted = encrypt_to_vec(&[5u8; 25], "pw", &fast_options(10));
        let mut stream = decrypt(encrypted.as_slice(), &SecretString::from("pw"), &DecryptOptions::default())
            .unwrap()
            .stream;
        assert_eq!(stream.produced(), 0);
        stream.next().unwrap().unwrap();
        assert_eq!(stream.produced(), 10);
        let rest: Vec<_> = stream.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(stream.produced(), 25);
    }
}
