//! Key derivation: PBKDF2-HMAC-SHA256 password → AES-256 key

use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::KEY_SIZE;

/// Key derivation algorithms recorded in the header `kdfId` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KdfId {
    Pbkdf2Sha256 = 1,
}

impl TryFrom<u8> for KdfId {
    type Error = CryptoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Pbkdf2Sha256),
            other => Err(CryptoError::UnsupportedKdf(other)),
        }
    }
}

impl From<KdfId> for u8 {
    fn from(id: KdfId) -> u8 {
        id as u8
    }
}

/// A 256-bit key derived from a password. Zeroized on drop.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from `password` and `salt` with PBKDF2-HMAC-SHA256.
///
/// Deterministic for identical inputs. An empty password is accepted; password
/// strength policy belongs to the caller. Callers validate `iterations >= 1`.
pub fn derive_key(password: &SecretString, salt: &[u8], iterations: u32) -> DerivedKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        iterations,
        &mut key,
    );
    DerivedKey::from_bytes(key)
}

/// Generate `len` random salt bytes.
pub fn generate_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
