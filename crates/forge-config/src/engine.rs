//! Explicitly constructed resolution context.
//!
//! An [`Engine`] owns everything one load → build → resolve → validate pass
//! needs. There is no global state.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::document::{Document, DocumentLoader, LoaderOptions};
use crate::error::{ConfigError, ConfigResult, SchemaError};
use crate::graph::{ScopeGraph, build_scope_graph};
use crate::resolve::{resolve_parallel, resolve_with};
use crate::schema::{SchemaValidator, ValidationViolation};
use crate::selector::{CollectionSelector, MatchByIdentity};
use crate::tree::ResolvedTree;
use crate::variables::VariableContext;

/// Configured resolution pipeline.
#[derive(Debug, Clone)]
pub struct Engine {
    loader: DocumentLoader,
    selector: Arc<dyn CollectionSelector>,
    schemas: Option<SchemaValidator>,
    parallel: bool,
}

impl Default for Engine {
    fn default() -> Self {
        EngineBuilder::new().build()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn has_schemas(&self) -> bool {
        self.schemas.is_some()
    }

    pub fn load(&self, entry: impl AsRef<Path>) -> ConfigResult<Document> {
        Ok(self.loader.load(entry)?)
    }

    pub fn load_str(&self, text: &str, origin: impl AsRef<Path>) -> ConfigResult<Document> {
        Ok(self.loader.load_str(text, origin)?)
    }

    pub fn build_graph(&self, document: &Document) -> ConfigResult<ScopeGraph> {
        Ok(build_scope_graph(document)?)
    }

    pub fn resolve(&self, graph: &ScopeGraph) -> ConfigResult<ResolvedTree> {
        let result = if self.parallel {
            resolve_parallel(graph, self.selector.as_ref())
        } else {
            resolve_with(graph, self.selector.as_ref())
        };
        result.map_err(ConfigError::Resolve)
    }

    /// Schema violations, against `version` or each solution's declared one.
    /// Fails with [`SchemaError::NotConfigured`] without a schema directory.
    pub fn validate(
        &self,
        tree: &ResolvedTree,
        version: Option<&str>,
    ) -> ConfigResult<Vec<ValidationViolation>> {
        let Some(schemas) = &self.schemas else {
            return Err(SchemaError::NotConfigured.into());
        };
        let violations = match version {
            Some(version) => schemas.validate(tree, version)?,
            None => schemas.validate_declared(tree)?,
        };
        Ok(violations)
    }

    /// Load, build and resolve an entry file; validate when a schema
    /// directory is configured.
    pub fn load_solution(&self, entry: impl AsRef<Path>) -> ConfigResult<ResolvedTree> {
        let entry = entry.as_ref();
        let document = self.load(entry)?;
        let graph = self.build_graph(&document)?;
        let tree = self.resolve(&graph)?;

        if self.schemas.is_some() {
            let violations = self.validate(&tree, None)?;
            if !violations.is_empty() {
                return Err(ConfigError::Validation(violations));
            }
        }

        info!(
            entry = %entry.display(),
            files = document.files.len(),
            scopes = graph.len(),
            "solution loaded"
        );
        Ok(tree)
    }
}

/// Builder for creating an Engine.
pub struct EngineBuilder {
    options: LoaderOptions,
    variables: Option<VariableContext>,
    selector: Arc<dyn CollectionSelector>,
    schema_dir: Option<PathBuf>,
    parallel: bool,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            options: LoaderOptions::default(),
            variables: None,
            selector: Arc::new(MatchByIdentity::default()),
            schema_dir: None,
            parallel: false,
        }
    }

    pub fn with_loader_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_variables(mut self, variables: VariableContext) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_selector(mut self, selector: impl CollectionSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    pub fn with_schema_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.schema_dir = Some(dir.into());
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn build(self) -> Engine {
        let loader = DocumentLoader::new(self.options);
        let loader = match self.variables {
            Some(variables) => loader.with_variables(variables),
            None => loader,
        };
        Engine {
            loader,
            selector: self.selector,
            schemas: self.schema_dir.map(SchemaValidator::new),
            parallel: self.parallel,
        }
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
