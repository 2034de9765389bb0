use thiserror::Error;

pub type QdencResult<T> = Result<T, QdencError>;

#[derive(Debug, Error)]
pub enum QdencError {
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
