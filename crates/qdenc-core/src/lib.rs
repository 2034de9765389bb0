pub mod config;
pub mod error;

pub use config::{CryptoConfig, LogConfig, QdencConfig, ShareConfig};
pub use error::{QdencError, QdencResult};
