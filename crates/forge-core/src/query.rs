//! Read-only query contract over a resolved solution.
//!
//! Builders and commands only ever see resolved values through this trait;
//! raw documents and unresolved references never leave the engine.

use serde_json::Value;

use crate::{Error, QualifiedPath, Result, ScopePath};

/// Trait for resolved configuration sources.
pub trait ConfigQuery: Send + Sync {
    /// Look up a scope or key by its qualified path.
    fn get(&self, path: &QualifiedPath) -> Result<&Value>;

    /// Names of the enabled configurations of a project.
    fn list_configurations(&self, solution: &str, project: &str) -> Vec<&str>;

    /// Look up a value that must be a string.
    fn get_str(&self, path: &QualifiedPath) -> Result<&str> {
        self.get(path)?
            .as_str()
            .ok_or_else(|| Error::UnexpectedType {
                path: path.to_string(),
                expected: "string".to_string(),
            })
    }
}

/// A view of one scope, resolving dotted keys relative to it.
pub struct ConfigurationView<'q> {
    query: &'q dyn ConfigQuery,
    scope: ScopePath,
}

impl<'q> ConfigurationView<'q> {
    pub fn new(query: &'q dyn ConfigQuery, scope: ScopePath) -> Self {
        Self { query, scope }
    }

    pub fn scope(&self) -> &ScopePath {
        &self.scope
    }

    /// Get a key (optionally dotted, e.g. `toolchain.path`) of the viewed scope.
    pub fn get(&self, key: &str) -> Result<&'q Value> {
        self.query.get(&self.path(key))
    }

    pub fn get_str(&self, key: &str) -> Result<&'q str> {
        self.query.get_str(&self.path(key))
    }

    fn path(&self, key: &str) -> QualifiedPath {
        QualifiedPath::new(
            self.scope.clone(),
            key.split('.').map(str::to_string).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Value);

    impl ConfigQuery for Fixed {
        fn get(&self, path: &QualifiedPath) -> Result<&Value> {
            let mut current = &self.0;
            for segment in path.key() {
                current = current
                    .get(segment)
                    .ok_or_else(|| Error::NotFound(path.to_string()))?;
            }
            Ok(current)
        }

        fn list_configurations(&self, _solution: &str, _project: &str) -> Vec<&str> {
            vec!["debug"]
        }
    }

    #[test]
    fn test_view_resolves_dotted_keys() {
        let source = Fixed(json!({"board": "x1", "toolchain": {"path": "/opt/gcc", "jobs": 4}}));
        let view = ConfigurationView::new(&source, ScopePath::configuration("s", "p", "debug"));

        assert_eq!(view.get_str("board").unwrap(), "x1");
        assert_eq!(view.get_str("toolchain.path").unwrap(), "/opt/gcc");
        assert!(matches!(
            view.get_str("toolchain.jobs"),
            Err(Error::UnexpectedType { .. })
        ));
        assert!(matches!(view.get("missing"), Err(Error::NotFound(_))));
    }
}
