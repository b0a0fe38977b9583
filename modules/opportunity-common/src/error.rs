use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnrichError>;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Result store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Submission fetch failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
