//! Solution loading and resolution for Forge.
//!
//! This crate handles:
//! - Loading JSONC solution files and expanding `<$include>` directives
//! - Variable expansion from the environment and explicit overrides
//! - Building the Solution → Project → Configuration scope graph
//! - Resolving references and derivations into a read-only tree
//! - Validating resolved solutions against versioned JSON schemas

pub mod derivation;
pub mod document;
pub mod engine;
pub mod error;
pub mod graph;
pub mod jsonc;
pub mod reference;
pub mod resolve;
pub mod schema;
pub mod selector;
pub mod tree;
pub mod variables;

pub use document::{Document, DocumentLoader, LoaderOptions, load_document};
pub use engine::{Engine, EngineBuilder};
pub use error::{BuildError, ConfigError, ConfigResult, LoadError, ResolveError, SchemaError};
pub use graph::{RawValue, ScopeGraph, ScopeNode, build_scope_graph};
pub use resolve::{resolve, resolve_parallel, resolve_with};
pub use schema::{SchemaValidator, ValidationViolation};
pub use selector::{CollectionSelector, MatchByIdentity, SelectionContext};
pub use tree::ResolvedTree;
pub use variables::{VariableContext, VariableContextBuilder};
