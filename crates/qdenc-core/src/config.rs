use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{QdencError, QdencResult};

/// Default plaintext segment size per chunk record (1 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default PBKDF2 work factor for both file keys and share-link KEKs
pub const DEFAULT_ITERATIONS: u32 = 300_000;

/// Default random salt length in bytes
pub const DEFAULT_SALT_LEN: usize = 32;

/// Largest plaintext segment whose ciphertext (+16-byte tag) still fits the
/// 32-bit `cipherLength` field of a chunk record.
pub const MAX_CHUNK_SIZE: usize = (u32::MAX - 16) as usize;

/// Top-level configuration (loaded from qdenc.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QdencConfig {
    pub crypto: CryptoConfig,
    pub share: ShareConfig,
    pub log: LogConfig,
}

/// Container encryption parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Plaintext bytes per chunk record (default: 1 MiB)
    pub chunk_size: usize,
    /// PBKDF2-HMAC-SHA256 iterations (default: 300000)
    pub iterations: u32,
    /// Salt length in bytes, 1..=255 (default: 32)
    pub salt_len: usize,
    /// Refuse to decrypt more than this many plaintext bytes (preview budget)
    pub max_plaintext_bytes: Option<u64>,
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            iterations: DEFAULT_ITERATIONS,
            salt_len: DEFAULT_SALT_LEN,
            max_plaintext_bytes: None,
        }
    }
}

/// Share-link key wrapping parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// PBKDF2 iterations for the key-encrypting key (default: 300000)
    pub iterations: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl QdencConfig {
    /// Parse a TOML document and validate it.
    pub fn from_toml_str(content: &str) -> QdencResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| QdencError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> QdencResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> QdencResult<()> {
        self.crypto.validate()?;
        if self.share.iterations == 0 {
            return Err(QdencError::Config("share.iterations must be at least 1".into()));
        }
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(QdencError::Config(format!(
                "log.format must be \"json\" or \"text\", got {other:?}"
            ))),
        }
    }
}

impl CryptoConfig {
    pub fn validate(&self) -> QdencResult<()> {
        if self.chunk_size == 0 {
            return Err(QdencError::Config("crypto.chunk_size must be non-zero".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(QdencError::Config(format!(
                "crypto.chunk_size {} exceeds maximum {MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.iterations == 0 {
            return Err(QdencError::Config("crypto.iterations must be at least 1".into()));
        }
        if !(1..=255).contains(&self.salt_len) {
            return Err(QdencError::Config(format!(
                "crypto.salt_len must be in 1..=255, got {}",
                self.salt_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[crypto]
chunk_size = 65536
iterations = 600000
salt_len = 16
max_plaintext_bytes = 10485760

[share]
iterations = 100000

[log]
level = "debug"
format = "json"
"#;
        let config = QdencConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.crypto.chunk_size, 65536);
        assert_eq!(config.crypto.iterations, 600_000);
        assert_eq!(config.crypto.salt_len, 16);
        assert_eq!(config.crypto.max_plaintext_bytes, Some(10 * 1024 * 1024));
        assert_eq!(config.share.iterations, 100_000);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.log.format, "json");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = QdencConfig::from_toml_str("").unwrap();
        assert_eq!(config.crypto.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.crypto.iterations, DEFAULT_ITERATIONS);
        assert_eq!(config.crypto.salt_len, DEFAULT_SALT_LEN);
        assert!(config.crypto.max_plaintext_bytes.is_none());
        assert_eq!(config.log.format, "text");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = QdencConfig::from_toml_str("[crypto]\nchunk_size = 4096\n").unwrap();
        assert_eq!(config.crypto.chunk_size, 4096);
        assert_eq!(config.crypto.iterations, DEFAULT_ITERATIONS);
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        let err = QdencConfig::from_toml_str("[crypto]\nchunk_size = 0\n").unwrap_err();
        assert!(matches!(err, QdencError::Config(_)));
    }

    #[test]
    fn test_rejects_oversized_salt() {
        let err = QdencConfig::from_toml_str("[crypto]\nsalt_len = 256\n").unwrap_err();
        assert!(err.to_string().contains("salt_len"));
    }

    #[test]
    fn test_rejects_zero_iterations() {
        assert!(QdencConfig::from_toml_str("[crypto]\niterations = 0\n").is_err());
        assert!(QdencConfig::from_toml_str("[share]\niterations = 0\n").is_err());
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(QdencConfig::from_toml_str("[log]\nformat = \"xml\"\n").is_err());
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = QdencConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.crypto.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qdenc.toml");
        std::fs::write(&path, "[crypto]\niterations = 1000\n").unwrap();
        let config = QdencConfig::load(&path).unwrap();
        assert_eq!(config.crypto.iterations, 1000);
    }
}
