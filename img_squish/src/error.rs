//! Error types for the squisher library.

use crate::converter::CodecError;
use shared_utils::ReplaceError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SquishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("Replacement failed: {0}")]
    Replace(#[from] ReplaceError),
}

pub type Result<T> = std::result::Result<T, SquishError>;
