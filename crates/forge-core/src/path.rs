//! Scope kinds and qualified paths.
//!
//! A qualified path addresses a scope or a key inside a scope, e.g.
//! `solutions[demo].projects[fw].configurations[debug].board`.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// The three levels of the solution hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    #[display("solution")]
    Solution,
    #[display("project")]
    Project,
    #[display("configuration")]
    Configuration,
}

impl ScopeKind {
    /// Name of the collection holding scopes of this kind.
    pub fn collection(&self) -> &'static str {
        match self {
            ScopeKind::Solution => "solutions",
            ScopeKind::Project => "projects",
            ScopeKind::Configuration => "configurations",
        }
    }

    /// Map a collection name back to the scope kind it holds.
    pub fn from_collection(collection: &str) -> Option<Self> {
        match collection {
            "solutions" => Some(ScopeKind::Solution),
            "projects" => Some(ScopeKind::Project),
            "configurations" => Some(ScopeKind::Configuration),
            _ => None,
        }
    }
}

/// Absolute address of a solution, project or configuration.
///
/// A configuration always has a project; the constructors enforce this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopePath {
    solution: String,
    project: Option<String>,
    configuration: Option<String>,
}

impl ScopePath {
    pub fn solution(solution: impl Into<String>) -> Self {
        Self {
            solution: solution.into(),
            project: None,
            configuration: None,
        }
    }

    pub fn project(solution: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            solution: solution.into(),
            project: Some(project.into()),
            configuration: None,
        }
    }

    pub fn configuration(
        solution: impl Into<String>,
        project: impl Into<String>,
        configuration: impl Into<String>,
    ) -> Self {
        Self {
            solution: solution.into(),
            project: Some(project.into()),
            configuration: Some(configuration.into()),
        }
    }

    pub fn kind(&self) -> ScopeKind {
        match (&self.project, &self.configuration) {
            (_, Some(_)) => ScopeKind::Configuration,
            (Some(_), None) => ScopeKind::Project,
            (None, None) => ScopeKind::Solution,
        }
    }

    pub fn solution_name(&self) -> &str {
        &self.solution
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn configuration_name(&self) -> Option<&str> {
        self.configuration.as_deref()
    }

    /// Name of the innermost scope.
    pub fn name(&self) -> &str {
        self.configuration
            .as_deref()
            .or(self.project.as_deref())
            .unwrap_or(&self.solution)
    }

    /// The enclosing scope, or `None` for a solution.
    pub fn parent(&self) -> Option<ScopePath> {
        match self.kind() {
            ScopeKind::Solution => None,
            ScopeKind::Project => Some(ScopePath::solution(&self.solution)),
            ScopeKind::Configuration => Some(Self {
                solution: self.solution.clone(),
                project: self.project.clone(),
                configuration: None,
            }),
        }
    }

    /// This scope or the enclosing scope of the requested kind.
    pub fn ancestor(&self, kind: ScopeKind) -> Option<ScopePath> {
        let mut current = Some(self.clone());
        while let Some(scope) = current {
            if scope.kind() == kind {
                return Some(scope);
            }
            current = scope.parent();
        }
        None
    }

    /// Qualified path of a key inside this scope.
    pub fn key(&self, key: impl Into<String>) -> QualifiedPath {
        QualifiedPath::new(self.clone(), vec![key.into()])
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "solutions[{}]", self.solution)?;
        if let Some(project) = &self.project {
            write!(f, ".projects[{}]", project)?;
        }
        if let Some(configuration) = &self.configuration {
            write!(f, ".configurations[{}]", configuration)?;
        }
        Ok(())
    }
}

/// A scope path followed by an optional dotted key path.
///
/// An empty key path addresses the scope itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedPath {
    scope: ScopePath,
    key: Vec<String>,
}

impl QualifiedPath {
    pub fn new(scope: ScopePath, key: Vec<String>) -> Self {
        Self { scope, key }
    }

    pub fn scope(&self) -> &ScopePath {
        &self.scope
    }

    /// Key segments; the first is the scope key, the rest navigate into its value.
    pub fn key(&self) -> &[String] {
        &self.key
    }

    pub fn is_scope(&self) -> bool {
        self.key.is_empty()
    }
}

impl fmt::Display for QualifiedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scope)?;
        for segment in &self.key {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for QualifiedPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: &str| Error::InvalidPath {
            path: s.to_string(),
            message: message.to_string(),
        };

        let mut rest = s.trim();
        let solution = take_scope(&mut rest, "solutions")
            .map_err(invalid)?
            .ok_or_else(|| invalid("must start with 'solutions[NAME]'"))?;

        let mut scope = ScopePath::solution(solution);
        if let Some(project) = take_scope(&mut rest, ".projects").map_err(invalid)? {
            scope = ScopePath::project(solution, project);
            if let Some(configuration) =
                take_scope(&mut rest, ".configurations").map_err(invalid)?
            {
                scope = ScopePath::configuration(solution, project, configuration);
            }
        }

        let mut key = Vec::new();
        if !rest.is_empty() {
            let tail = rest
                .strip_prefix('.')
                .ok_or_else(|| invalid("expected '.' before key"))?;
            for segment in tail.split('.') {
                if segment.trim().is_empty() {
                    return Err(invalid("empty key segment"));
                }
                key.push(segment.to_string());
            }
        }

        Ok(Self { scope, key })
    }
}

/// Consume `collection[NAME]` from the front of `rest`.
fn take_scope<'a>(
    rest: &mut &'a str,
    collection: &str,
) -> std::result::Result<Option<&'a str>, &'static str> {
    let Some(after) = rest
        .strip_prefix(collection)
        .and_then(|r| r.strip_prefix('['))
    else {
        return Ok(None);
    };
    let end = after.find(']').ok_or("unterminated '['")?;
    let name = &after[..end];
    if name.trim().is_empty() {
        return Err("empty scope name");
    }
    *rest = &after[end + 1..];
    Ok(Some(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_configuration_key() {
        let path: QualifiedPath = "solutions[demo].projects[fw].configurations[debug].board"
            .parse()
            .unwrap();
        assert_eq!(
            path.scope(),
            &ScopePath::configuration("demo", "fw", "debug")
        );
        assert_eq!(path.key(), &["board".to_string()]);
        assert_eq!(
            path.to_string(),
            "solutions[demo].projects[fw].configurations[debug].board"
        );
    }

    #[test]
    fn test_parse_scope_only() {
        let path: QualifiedPath = "solutions[demo].projects[fw]".parse().unwrap();
        assert!(path.is_scope());
        assert_eq!(path.scope().kind(), ScopeKind::Project);
    }

    #[test]
    fn test_parse_nested_key() {
        let path: QualifiedPath = "solutions[demo].toolchain.gcc.path".parse().unwrap();
        assert_eq!(path.scope().kind(), ScopeKind::Solution);
        assert_eq!(path.key().len(), 3);
    }

    #[test]
    fn test_names_may_contain_dots() {
        let path: QualifiedPath = "solutions[demo].projects[gcc-9.3].cflags".parse().unwrap();
        assert_eq!(path.scope().project_name(), Some("gcc-9.3"));
        assert_eq!(path.key(), &["cflags".to_string()]);
    }

    #[test]
    fn test_invalid_paths() {
        for input in [
            "projects[fw]",
            "solutions[]",
            "solutions[demo",
            "solutions[demo]board",
            "solutions[demo]..board",
        ] {
            let result = input.parse::<QualifiedPath>();
            assert!(
                matches!(result, Err(Error::InvalidPath { .. })),
                "expected {input} to be rejected"
            );
        }
    }

    #[test]
    fn test_parent_and_ancestor() {
        let config = ScopePath::configuration("demo", "fw", "debug");
        assert_eq!(config.parent(), Some(ScopePath::project("demo", "fw")));
        assert_eq!(
            config.ancestor(ScopeKind::Solution),
            Some(ScopePath::solution("demo"))
        );
        assert_eq!(config.ancestor(ScopeKind::Configuration), Some(config.clone()));
        assert_eq!(ScopePath::solution("demo").ancestor(ScopeKind::Project), None);
        assert_eq!(config.name(), "debug");
    }

    #[test]
    fn test_scope_kind_collections() {
        for kind in [
            ScopeKind::Solution,
            ScopeKind::Project,
            ScopeKind::Configuration,
        ] {
            assert_eq!(ScopeKind::from_collection(kind.collection()), Some(kind));
        }
        assert_eq!(ScopeKind::from_collection("tool_chains"), None);
        assert_eq!(ScopeKind::Configuration.to_string(), "configuration");
    }
}
