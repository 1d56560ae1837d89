//! Schema validation of resolved solutions.
//!
//! Schemas live in a versioned directory, `<root>/<version>/solution.json`
//! (or `.jsonc`), and are applied to each solution object separately.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::document::DocumentLoader;
use crate::error::SchemaError;
use crate::tree::ResolvedTree;
use forge_core::ScopeKind;

/// File stem of the schema applied to each solution.
pub const SCHEMA_NAME: &str = "solution";

/// Solution key declaring which schema version it follows.
pub const SCHEMA_KEY: &str = "schema";

/// One place where the resolved tree does not match its schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationViolation {
    /// Qualified path of the offending value.
    pub path: String,
    /// Schema location of the failed constraint.
    pub expected: String,
    /// The offending value as JSON.
    pub actual: String,
    pub message: String,
}

impl fmt::Display for ValidationViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (schema {})", self.path, self.message, self.expected)
    }
}

/// Loads versioned schemas and validates resolved trees against them.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    root: PathBuf,
    loader: DocumentLoader,
}

impl SchemaValidator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            loader: DocumentLoader::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the solution schema of one version.
    pub fn load_schema(&self, version: &str) -> Result<Value, SchemaError> {
        let base = self.root.join(version).join(SCHEMA_NAME);
        for extension in ["json", "jsonc"] {
            let path = base.with_extension(extension);
            if path.is_file() {
                debug!(path = %path.display(), "loading schema");
                return Ok(self.loader.load(&path)?.root);
            }
        }
        Err(SchemaError::NotFound {
            root: self.root.clone(),
            version: version.to_string(),
            name: SCHEMA_NAME.to_string(),
        })
    }

    /// Validate every solution against one schema version.
    pub fn validate(
        &self,
        tree: &ResolvedTree,
        version: &str,
    ) -> Result<Vec<ValidationViolation>, SchemaError> {
        let schema = self.load_schema(version)?;
        let validator = self.compile(&schema, version)?;

        let violations: Vec<_> = solutions(tree)
            .flat_map(|(name, body)| check(&validator, name, body))
            .collect();
        info!(version, violations = violations.len(), "validated solution tree");
        Ok(violations)
    }

    /// Validate each solution against the version named by its own `schema` key.
    pub fn validate_declared(
        &self,
        tree: &ResolvedTree,
    ) -> Result<Vec<ValidationViolation>, SchemaError> {
        let mut validators = BTreeMap::new();
        let mut violations = Vec::new();

        for (name, body) in solutions(tree) {
            let Some(version) = body.get(SCHEMA_KEY).and_then(Value::as_str) else {
                violations.push(ValidationViolation {
                    path: format!("solutions[{name}].{SCHEMA_KEY}"),
                    expected: "schema version string".to_string(),
                    actual: body.get(SCHEMA_KEY).unwrap_or(&Value::Null).to_string(),
                    message: "solution does not declare a schema version".to_string(),
                });
                continue;
            };

            if !validators.contains_key(version) {
                let schema = self.load_schema(version)?;
                validators.insert(version.to_string(), self.compile(&schema, version)?);
            }
            if let Some(validator) = validators.get(version) {
                violations.extend(check(validator, name, body));
            }
        }
        Ok(violations)
    }

    fn compile(&self, schema: &Value, version: &str) -> Result<jsonschema::Validator, SchemaError> {
        jsonschema::validator_for(schema).map_err(|e| SchemaError::Invalid {
            path: self.root.join(version).join(SCHEMA_NAME),
            message: e.to_string(),
        })
    }
}

/// Validate every solution of a tree against an in-memory schema.
pub fn validate_against(
    schema: &Value,
    tree: &ResolvedTree,
) -> Result<Vec<ValidationViolation>, SchemaError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| SchemaError::Invalid {
        path: PathBuf::from("<memory>"),
        message: e.to_string(),
    })?;
    Ok(solutions(tree)
        .flat_map(|(name, body)| check(&validator, name, body))
        .collect())
}

fn solutions(tree: &ResolvedTree) -> impl Iterator<Item = (&str, &Value)> {
    tree.as_value()
        .get(ScopeKind::Solution.collection())
        .and_then(Value::as_object)
        .into_iter()
        .flat_map(|map| map.iter().map(|(name, body)| (name.as_str(), body)))
}

fn check(validator: &jsonschema::Validator, solution: &str, body: &Value) -> Vec<ValidationViolation> {
    validator
        .iter_errors(body)
        .map(|error| ValidationViolation {
            path: display_path(solution, &error.instance_path.to_string()),
            expected: error.schema_path.to_string(),
            actual: error.instance.to_string(),
            message: error.to_string(),
        })
        .collect()
}

/// Turn a JSON pointer inside a solution into a qualified path.
fn display_path(solution: &str, pointer: &str) -> String {
    let mut out = format!("solutions[{solution}]");
    let mut segments = pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .peekable();
    let mut level = Some(ScopeKind::Project);

    while let Some(segment) = segments.next() {
        match level {
            Some(kind) if segment == kind.collection() && segments.peek().is_some() => {
                let name = segments.next().unwrap_or_default();
                out.push_str(&format!(".{segment}[{name}]"));
                level = match kind {
                    ScopeKind::Project => Some(ScopeKind::Configuration),
                    _ => None,
                };
            }
            _ => {
                out.push('.');
                out.push_str(&segment);
                level = None;
            }
        }
    }
    out
}
