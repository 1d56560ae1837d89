//! Error types for Forge.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("unexpected type at {path}: expected {expected}")]
    UnexpectedType { path: String, expected: String },
}

pub type Result<T> = std::result::Result<T, Error>;
