//! Solution loading and resolution errors.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::ValidationViolation;
use forge_core::ScopeKind;

/// Errors raised while reading and expanding solution documents.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {path}:{line}:{column}: {message}")]
    MalformedDocument {
        path: PathBuf,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("include '{target}' referenced from {from} not found")]
    IncludeNotFound { from: PathBuf, target: String },

    #[error("include depth limit of {limit} exceeded in {path}")]
    IncludeDepthExceeded { path: PathBuf, limit: usize },
}

/// Errors raised while turning a document into a scope graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("invalid scope shape at {path}: {message}")]
    InvalidScopeShape { path: String, message: String },

    #[error("duplicate {kind} '{name}' at {path}")]
    DuplicateScope {
        kind: ScopeKind,
        name: String,
        path: String,
    },

    #[error("reference marker in key '{key}' at {path}, references can only appear as values")]
    ReferenceInKey { path: String, key: String },

    #[error("malformed reference '{text}' at {path}: {message}")]
    MalformedReference {
        path: String,
        text: String,
        message: String,
    },
}

/// A single failure found while resolving references and derivations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown reference target '{reference}' in {path}")]
    UnknownReferenceTarget { path: String, reference: String },

    #[error("cyclic reference: {}", .chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    #[error("cyclic derivation: {}", .chain.join(" -> "))]
    CyclicDerivation { chain: Vec<String> },

    #[error("type mismatch in {path}: {message}")]
    TypeMismatch { path: String, message: String },
}

/// Errors raised while locating or compiling a schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema directory configured")]
    NotConfigured,

    #[error("no schema '{name}' for version '{version}' under {root}")]
    NotFound {
        root: PathBuf,
        version: String,
        name: String,
    },

    #[error("invalid schema {path}: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Any failure of the full load → build → resolve → validate pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("resolution failed with {} error(s)", .0.len())]
    Resolve(Vec<ResolveError>),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("schema validation failed with {} violation(s)", .0.len())]
    Validation(Vec<ValidationViolation>),
}

impl From<Vec<ResolveError>> for ConfigError {
    fn from(errors: Vec<ResolveError>) -> Self {
        ConfigError::Resolve(errors)
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
