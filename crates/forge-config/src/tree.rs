//! The resolved, read-only solution tree.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use forge_core::{ConfigQuery, Error, QualifiedPath, ScopeKind, ScopePath};

/// Key a scope sets to `true` to be skipped by listings.
pub const DISABLED_KEY: &str = "disabled";

/// Solution key naming plugin search paths.
pub const PLUGINS_KEY: &str = "plugins";

/// A fully resolved solution tree: no references or derivation pointers
/// remain. Shaped like the input, `{"solutions": {S: {.., "projects": ..}}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResolvedTree {
    root: Value,
}

impl ResolvedTree {
    /// Nest resolved scope key sets into a tree. Parents sort before children.
    pub(crate) fn assemble(scopes: BTreeMap<ScopePath, Value>) -> Self {
        let mut solutions = Map::new();

        for (path, value) in scopes {
            let Value::Object(mut body) = value else {
                continue;
            };
            match path.kind() {
                ScopeKind::Solution => {
                    body.insert(
                        ScopeKind::Project.collection().to_string(),
                        Value::Object(Map::new()),
                    );
                    solutions.insert(path.solution_name().to_string(), Value::Object(body));
                }
                ScopeKind::Project => {
                    body.insert(
                        ScopeKind::Configuration.collection().to_string(),
                        Value::Object(Map::new()),
                    );
                    let project = path.project_name().unwrap_or_default().to_string();
                    if let Some(projects) = children(&mut solutions, &path, ScopeKind::Project) {
                        projects.insert(project, Value::Object(body));
                    }
                }
                ScopeKind::Configuration => {
                    let configuration = path.configuration_name().unwrap_or_default().to_string();
                    if let Some(configurations) =
                        children(&mut solutions, &path, ScopeKind::Configuration)
                    {
                        configurations.insert(configuration, Value::Object(body));
                    }
                }
            }
        }

        let mut root = Map::new();
        root.insert(
            ScopeKind::Solution.collection().to_string(),
            Value::Object(solutions),
        );
        Self {
            root: Value::Object(root),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Resolved keys (and children) of a scope.
    pub fn scope_value(&self, scope: &ScopePath) -> Option<&Value> {
        let mut node = self
            .root
            .get(ScopeKind::Solution.collection())?
            .get(scope.solution_name())?;
        if let Some(project) = scope.project_name() {
            node = node.get(ScopeKind::Project.collection())?.get(project)?;
        }
        if let Some(configuration) = scope.configuration_name() {
            node = node
                .get(ScopeKind::Configuration.collection())?
                .get(configuration)?;
        }
        Some(node)
    }

    pub fn solution_value(&self, solution: &str) -> Option<&Value> {
        self.scope_value(&ScopePath::solution(solution))
    }

    /// Look up a scope or a key inside a scope.
    pub fn get(&self, path: &QualifiedPath) -> forge_core::Result<&Value> {
        let not_found = || Error::NotFound(path.to_string());
        let mut node = self.scope_value(path.scope()).ok_or_else(not_found)?;
        for segment in path.key() {
            node = match node {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(not_found)?;
        }
        Ok(node)
    }

    /// Parse a textual qualified path and look it up.
    pub fn lookup(&self, path: &str) -> forge_core::Result<&Value> {
        self.get(&path.parse()?)
    }

    pub fn list_solutions(&self) -> Vec<&str> {
        self.root
            .get(ScopeKind::Solution.collection())
            .map(enabled_names)
            .unwrap_or_default()
    }

    pub fn list_projects(&self, solution: &str) -> Vec<&str> {
        self.solution_value(solution)
            .and_then(|s| s.get(ScopeKind::Project.collection()))
            .map(enabled_names)
            .unwrap_or_default()
    }

    /// Names of the enabled configurations of a project.
    pub fn list_configurations(&self, solution: &str, project: &str) -> Vec<&str> {
        self.scope_value(&ScopePath::project(solution, project))
            .and_then(|p| p.get(ScopeKind::Configuration.collection()))
            .map(enabled_names)
            .unwrap_or_default()
    }

    /// First value stored under `key` anywhere in the tree, depth first.
    pub fn find_key(&self, key: &str) -> Option<&Value> {
        find_key(&self.root, key)
    }

    /// Plugin search paths declared by a solution's `plugins` key.
    pub fn plugin_search_paths(&self, solution: &str) -> Vec<PathBuf> {
        match self.solution_value(solution).and_then(|s| s.get(PLUGINS_KEY)) {
            Some(Value::String(path)) => vec![PathBuf::from(path)],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(PathBuf::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.root)
    }
}

impl ConfigQuery for ResolvedTree {
    fn get(&self, path: &QualifiedPath) -> forge_core::Result<&Value> {
        ResolvedTree::get(self, path)
    }

    fn list_configurations(&self, solution: &str, project: &str) -> Vec<&str> {
        ResolvedTree::list_configurations(self, solution, project)
    }
}

fn children<'m>(
    solutions: &'m mut Map<String, Value>,
    path: &ScopePath,
    kind: ScopeKind,
) -> Option<&'m mut Map<String, Value>> {
    let solution = solutions.get_mut(path.solution_name())?;
    let projects = solution
        .get_mut(ScopeKind::Project.collection())?
        .as_object_mut()?;
    match kind {
        ScopeKind::Project => Some(projects),
        ScopeKind::Configuration => projects
            .get_mut(path.project_name()?)?
            .get_mut(ScopeKind::Configuration.collection())?
            .as_object_mut(),
        ScopeKind::Solution => None,
    }
}

fn enabled_names(collection: &Value) -> Vec<&str> {
    collection
        .as_object()
        .map(|map| {
            map.iter()
                .filter(|(_, body)| !body.get(DISABLED_KEY).and_then(Value::as_bool).unwrap_or(false))
                .map(|(name, _)| name.as_str())
                .collect()
        })
        .unwrap_or_default()
}

fn find_key<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}
