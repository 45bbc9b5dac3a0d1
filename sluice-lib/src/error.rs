use thiserror::Error;

use crate::cache::LoadError;

/// Errors that can occur in the rate limiter
#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Metrics error: {0}")]
    Metrics(String),

    #[error("Too many requests for {operation}")]
    TooManyRequests { operation: String },
}

pub type Result<T> = std::result::Result<T, SluiceError>;
