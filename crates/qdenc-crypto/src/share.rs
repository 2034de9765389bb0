//! Share-link key wrapping
//!
//! A share token is `publicId || secret`. The server stores the public id, the
//! file password wrapped under a KEK, the wrap nonce, and a hash of the secret;
//! the secret itself travels only inside the share URL.
//!
//! ```text
//! KEK        = PBKDF2-SHA256(password = secret, salt = UTF-8(publicId), 300000)
//! wrappedDek = AES-256-GCM(KEK, wrapNonce, file password)   (no AAD)
//! ```

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use qdenc_core::config::DEFAULT_ITERATIONS;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::derive_key;
use crate::NONCE_SIZE;

/// Length of the public identifier prefix of a share token
pub const PUBLIC_ID_LEN: usize = 8;

/// Length of the secret suffix of a share token
pub const SECRET_LEN: usize = 24;

/// A share token split into its public and secret halves.
pub struct ShareToken {
    public_id: String,
    secret: SecretString,
}

impl ShareToken {
    /// Generate a fresh random token (8 + 24 alphanumeric characters).
    pub fn generate() -> Self {
        Self {
            public_id: random_alphanumeric(PUBLIC_ID_LEN),
            secret: SecretString::from(random_alphanumeric(SECRET_LEN)),
        }
    }

    /// Split a full token into public id (first 8 characters) and secret (the rest).
    pub fn parse(token: &str) -> CryptoResult<Self> {
        if !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CryptoError::InvalidToken(
                "token must be ASCII alphanumeric".into(),
            ));
        }
        if token.len() <= PUBLIC_ID_LEN {
            return Err(CryptoError::InvalidToken(format!(
                "token of {} characters has no secret portion",
                token.len()
            )));
        }
        let (public_id, secret) = token.split_at(PUBLIC_ID_LEN);
        Ok(Self {
            public_id: public_id.to_string(),
            secret: SecretString::from(secret.to_string()),
        })
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    /// The full token string shared with recipients.
    pub fn to_token(&self) -> SecretString {
        SecretString::from(format!(
            "{}{}",
            self.public_id,
            self.secret.expose_secret()
        ))
    }

    pub fn secret_hash(&self) -> String {
        hash_secret(&self.secret)
    }
}

impl std::fmt::Debug for ShareToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareToken")
            .field("public_id", &self.public_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// The file password sealed under a share KEK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedSecret {
    /// AES-GCM output: encrypted password || tag
    pub wrapped_dek: Vec<u8>,
    pub wrap_nonce: [u8; NONCE_SIZE],
}

/// Wrap `password` under a KEK derived from `secret` and `public_id`.
pub fn wrap_secret(
    secret: &SecretString,
    public_id: &str,
    password: &SecretString,
) -> CryptoResult<WrappedSecret> {
    wrap_secret_with_iterations(secret, public_id, password, DEFAULT_ITERATIONS)
}

pub fn wrap_secret_with_iterations(
    secret: &SecretString,
    public_id: &str,
    password: &SecretString,
    iterations: u32,
) -> CryptoResult<WrappedSecret> {
    let cipher = kek_cipher(secret, public_id, iterations)?;

    let mut wrap_nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut wrap_nonce);

    let wrapped_dek = cipher
        .encrypt(
            Nonce::from_slice(&wrap_nonce),
            password.expose_secret().as_bytes(),
        )
        .map_err(|e| CryptoError::Seal(format!("key wrapping failed: {e}")))?;

    tracing::debug!(public_id, "wrapped share secret");
    Ok(WrappedSecret {
        wrapped_dek,
        wrap_nonce,
    })
}

/// Recover the file password. Fails with [`CryptoError::Integrity`] for a
/// wrong secret or public id, or a tampered wrapped value.
pub fn unwrap_secret(
    secret: &SecretString,
    public_id: &str,
    wrapped: &WrappedSecret,
) -> CryptoResult<SecretString> {
    unwrap_secret_with_iterations(secret, public_id, wrapped, DEFAULT_ITERATIONS)
}

pub fn unwrap_secret_with_iterations(
    secret: &SecretString,
    public_id: &str,
    wrapped: &WrappedSecret,
    iterations: u32,
) -> CryptoResult<SecretString> {
    let cipher = kek_cipher(secret, public_id, iterations)?;

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&wrapped.wrap_nonce),
            wrapped.wrapped_dek.as_slice(),
        )
        .map_err(|_| {
            tracing::warn!(public_id, "share secret unwrap failed");
            CryptoError::Integrity("key unwrapping failed: wrong secret or corrupted data".into())
        })?;

    match String::from_utf8(plaintext) {
        Ok(password) => Ok(SecretString::from(password)),
        Err(e) => {
            e.into_bytes().zeroize();
            Err(CryptoError::Malformed(
                "unwrapped password is not valid UTF-8".into(),
            ))
        }
    }
}

fn kek_cipher(secret: &SecretString, public_id: &str, iterations: u32) -> CryptoResult<Aes256Gcm> {
    if iterations == 0 {
        return Err(CryptoError::InvalidOptions(
            "KEK iterations must be at least 1".into(),
        ));
    }
    let kek = derive_key(secret, public_id.as_bytes(), iterations);
    Ok(Aes256Gcm::new(kek.as_bytes().into()))
}

/// Lowercase hex SHA-256 of the secret, as stored server-side.
pub fn hash_secret(secret: &SecretString) -> String {
    hex::encode(Sha256::digest(secret.expose_secret().as_bytes()))
}

/// Constant-time check of a secret against a stored [`hash_secret`] value.
pub fn verify_secret_hash(secret: &SecretString, expected_hex: &str) -> bool {
    let computed = hash_secret(secret);
    let expected = expected_hex.to_ascii_lowercase();
    computed.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// What a server persists for one share link (camelCase JSON, base64 fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRecord {
    pub public_id: String,
    pub wrapped_dek: String,
    pub wrap_nonce: String,
    pub secret_hash: String,
}

impl ShareRecord {
    pub fn new(token: &ShareToken, wrapped: &WrappedSecret) -> Self {
        Self {
            public_id: token.public_id().to_string(),
            wrapped_dek: STANDARD.encode(&wrapped.wrapped_dek),
            wrap_nonce: STANDARD.encode(wrapped.wrap_nonce),
            secret_hash: token.secret_hash(),
        }
    }

    /// Decode the base64 fields back into a [`WrappedSecret`].
    pub fn wrapped(&self) -> CryptoResult<WrappedSecret> {
        let wrapped_dek = STANDARD
            .decode(&self.wrapped_dek)
            .map_err(|e| CryptoError::Malformed(format!("wrappedDek base64: {e}")))?;
        let nonce = STANDARD
            .decode(&self.wrap_nonce)
            .map_err(|e| CryptoError::Malformed(format!("wrapNonce base64: {e}")))?;
        let wrap_nonce: [u8; NONCE_SIZE] = nonce.as_slice().try_into().map_err(|_| {
            CryptoError::Malformed(format!(
                "wrapNonce is {} bytes, expected {NONCE_SIZE}",
                nonce.len()
            ))
        })?;
        Ok(WrappedSecret {
            wrapped_dek,
            wrap_nonce,
        })
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CryptoError::Malformed(format!("share record serialization: {e}")))
    }

    pub fn from_json(data: &str) -> CryptoResult<Self> {
        serde_json::from_str(data)
            .map_err(|e| CryptoError::Malformed(format!("share record deserialization: {e}")))
    }
}

fn random_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
