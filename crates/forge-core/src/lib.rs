//! Core types shared by the Forge configuration engine and its consumers.
//!
//! This crate contains:
//! - Scope kinds and qualified scope/key paths
//! - The read-only query contract builders and commands consume
//! - Common error types

pub mod error;
pub mod path;
pub mod query;

pub use error::{Error, Result};
pub use path::{QualifiedPath, ScopeKind, ScopePath};
pub use query::{ConfigQuery, ConfigurationView};
