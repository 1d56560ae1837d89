//! Scope graph construction.
//!
//! Turns a loaded document into Solution → Project → Configuration nodes,
//! each holding its own keys as raw (unresolved) values.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::debug;

use crate::document::Document;
use crate::error::BuildError;
use crate::reference::{self, DERIVED_OPEN, REF_OPEN, Template};
use forge_core::{ScopeKind, ScopePath};

/// Key holding a configuration's derivation pointer.
pub const DERIVATION_KEY: &str = "data";

/// Key naming an entry in list-form collections.
pub const NAME_KEY: &str = "name";

/// An unresolved value as written in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Scalar(Value),
    List(Vec<RawValue>),
    Object(BTreeMap<String, RawValue>),
    Reference(Template),
    Derivation(Derivation),
}

/// A configuration's inheritance pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivation {
    /// Absolute target, with empty names filled in from the owner.
    pub target: ScopePath,
    /// Pointer text as written.
    pub raw: String,
}

impl RawValue {
    /// Visit every template in this value.
    pub fn templates(&self) -> Vec<&Template> {
        let mut out = Vec::new();
        self.collect_templates(&mut out);
        out
    }

    fn collect_templates<'a>(&'a self, out: &mut Vec<&'a Template>) {
        match self {
            RawValue::Reference(t) => out.push(t),
            RawValue::List(items) => items.iter().for_each(|i| i.collect_templates(out)),
            RawValue::Object(map) => map.values().for_each(|i| i.collect_templates(out)),
            RawValue::Scalar(_) | RawValue::Derivation(_) => {}
        }
    }
}

/// One solution, project or configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeNode {
    pub kind: ScopeKind,
    pub path: ScopePath,
    pub keys: BTreeMap<String, RawValue>,
}

impl ScopeNode {
    pub fn derivation(&self) -> Option<&Derivation> {
        match self.keys.get(DERIVATION_KEY) {
            Some(RawValue::Derivation(d)) => Some(d),
            _ => None,
        }
    }

    /// Keys that resolve to values (everything but the derivation pointer).
    pub fn value_keys(&self) -> impl Iterator<Item = (&String, &RawValue)> {
        self.keys
            .iter()
            .filter(|(_, v)| !matches!(v, RawValue::Derivation(_)))
    }

    pub fn has_value_key(&self, key: &str) -> bool {
        self.keys
            .get(key)
            .is_some_and(|v| !matches!(v, RawValue::Derivation(_)))
    }
}

/// All scopes of a document, keyed by path.
///
/// Iteration is pre-order: a scope always precedes its children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeGraph {
    nodes: BTreeMap<ScopePath, ScopeNode>,
}

impl ScopeGraph {
    pub fn scope(&self, path: &ScopePath) -> Option<&ScopeNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &ScopePath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &ScopeNode> {
        self.nodes.values()
    }

    pub fn solutions(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .keys()
            .filter(|p| p.kind() == ScopeKind::Solution)
            .map(|p| p.solution_name())
    }

    /// Every scope belonging to one solution, the solution first.
    pub fn solution_scopes<'a>(&'a self, solution: &'a str) -> impl Iterator<Item = &'a ScopeNode> {
        self.nodes
            .values()
            .filter(move |n| n.path.solution_name() == solution)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn insert(&mut self, node: ScopeNode) -> Result<(), BuildError> {
        if self.nodes.contains_key(&node.path) {
            return Err(BuildError::DuplicateScope {
                kind: node.kind,
                name: node.path.name().to_string(),
                path: node.path.to_string(),
            });
        }
        self.nodes.insert(node.path.clone(), node);
        Ok(())
    }
}

/// Build the scope graph of a loaded document.
pub fn build_scope_graph(document: &Document) -> Result<ScopeGraph, BuildError> {
    let root = document
        .root
        .as_object()
        .ok_or_else(|| shape("<root>", "document must be an object"))?;
    let solutions = root
        .get(ScopeKind::Solution.collection())
        .ok_or_else(|| shape("<root>", "missing top-level 'solutions'"))?;

    let mut graph = ScopeGraph::default();
    for (solution, body) in entries(solutions, ScopeKind::Solution, "solutions")? {
        let path = ScopePath::solution(solution.as_str());
        let projects = child_collection(body, ScopeKind::Project, &path)?;
        graph.insert(scope_node(&path, body)?)?;

        for (project, body) in entries(projects, ScopeKind::Project, &format!("{path}.projects"))? {
            let path = ScopePath::project(solution.as_str(), project.as_str());
            let configurations = child_collection(body, ScopeKind::Configuration, &path)?;
            graph.insert(scope_node(&path, body)?)?;

            for (configuration, body) in entries(
                configurations,
                ScopeKind::Configuration,
                &format!("{path}.configurations"),
            )? {
                let path = ScopePath::configuration(
                    solution.as_str(),
                    project.as_str(),
                    configuration.as_str(),
                );
                graph.insert(scope_node(&path, body)?)?;
            }
        }
    }

    debug!(scopes = graph.len(), "built scope graph");
    Ok(graph)
}

fn shape(path: &str, message: impl Into<String>) -> BuildError {
    BuildError::InvalidScopeShape {
        path: path.to_string(),
        message: message.into(),
    }
}

fn child_collection<'a>(
    body: &'a Map<String, Value>,
    kind: ScopeKind,
    owner: &ScopePath,
) -> Result<&'a Value, BuildError> {
    body.get(kind.collection()).ok_or_else(|| {
        shape(
            &owner.to_string(),
            format!("missing '{}' collection", kind.collection()),
        )
    })
}

/// Named entries of a collection, written either as a map or as a list of
/// objects carrying a `name` key.
fn entries<'a>(
    collection: &'a Value,
    kind: ScopeKind,
    at: &str,
) -> Result<Vec<(String, &'a Map<String, Value>)>, BuildError> {
    let mut out = Vec::new();
    match collection {
        Value::Object(map) => {
            for (name, body) in map {
                let body = body
                    .as_object()
                    .ok_or_else(|| shape(&format!("{at}[{name}]"), format!("{kind} must be an object")))?;
                out.push((name.clone(), body));
            }
        }
        Value::Array(items) => {
            let mut seen = HashSet::new();
            for (idx, item) in items.iter().enumerate() {
                let body = item
                    .as_object()
                    .ok_or_else(|| shape(&format!("{at}[#{idx}]"), format!("{kind} must be an object")))?;
                let name = body
                    .get(NAME_KEY)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .ok_or_else(|| {
                        shape(&format!("{at}[#{idx}]"), format!("{kind} is missing a string 'name'"))
                    })?;
                if !seen.insert(name.to_string()) {
                    return Err(BuildError::DuplicateScope {
                        kind,
                        name: name.to_string(),
                        path: at.to_string(),
                    });
                }
                out.push((name.to_string(), body));
            }
        }
        _ => {
            return Err(shape(
                at,
                format!("'{}' must be an object or a list", kind.collection()),
            ));
        }
    }

    for (name, _) in &out {
        if name.trim().is_empty() || name.contains(|c| c == '[' || c == ']') {
            return Err(shape(at, format!("invalid {kind} name '{name}'")));
        }
    }
    Ok(out)
}

fn scope_node(path: &ScopePath, body: &Map<String, Value>) -> Result<ScopeNode, BuildError> {
    let kind = path.kind();
    let structural = match kind {
        ScopeKind::Solution => Some(ScopeKind::Project.collection()),
        ScopeKind::Project => Some(ScopeKind::Configuration.collection()),
        ScopeKind::Configuration => None,
    };

    let mut keys = BTreeMap::new();
    for (key, value) in body {
        if Some(key.as_str()) == structural {
            continue;
        }
        let at = path.key(key.as_str()).to_string();
        check_key(&at, key)?;

        let raw = if key == DERIVATION_KEY
            && value.as_str().is_some_and(|s| s.trim_start().starts_with(DERIVED_OPEN))
        {
            derivation(path, &at, value.as_str().unwrap_or_default())?
        } else {
            raw_value(&at, value)?
        };
        keys.insert(key.clone(), raw);
    }

    Ok(ScopeNode {
        kind,
        path: path.clone(),
        keys,
    })
}

fn derivation(owner: &ScopePath, at: &str, text: &str) -> Result<RawValue, BuildError> {
    if owner.kind() != ScopeKind::Configuration {
        return Err(shape(at, "only configurations may derive from another configuration"));
    }
    let pointer = reference::parse_derivation(text).map_err(|message| BuildError::MalformedReference {
        path: at.to_string(),
        text: text.to_string(),
        message,
    })?;

    let solution = pointer
        .solution
        .unwrap_or_else(|| owner.solution_name().to_string());
    let target = if !pointer.has_project {
        ScopePath::solution(solution)
    } else {
        let project = pointer
            .project
            .or_else(|| owner.project_name().map(str::to_string))
            .unwrap_or_default();
        match (pointer.has_configuration, pointer.configuration) {
            (true, Some(configuration)) => ScopePath::configuration(solution, project, configuration),
            (true, None) => {
                return Err(BuildError::MalformedReference {
                    path: at.to_string(),
                    text: text.to_string(),
                    message: "configuration name is required".to_string(),
                });
            }
            (false, _) => ScopePath::project(solution, project),
        }
    };

    Ok(RawValue::Derivation(Derivation {
        target,
        raw: text.trim().to_string(),
    }))
}

fn check_key(at: &str, key: &str) -> Result<(), BuildError> {
    if key.contains(REF_OPEN) || key.contains(DERIVED_OPEN) {
        return Err(BuildError::ReferenceInKey {
            path: at.to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}

fn raw_value(at: &str, value: &Value) -> Result<RawValue, BuildError> {
    match value {
        Value::String(s) => {
            if s.contains(DERIVED_OPEN) {
                return Err(BuildError::MalformedReference {
                    path: at.to_string(),
                    text: s.clone(),
                    message: format!("derivation pointers are only valid under '{DERIVATION_KEY}'"),
                });
            }
            match reference::parse_template(s) {
                Ok(Some(template)) => Ok(RawValue::Reference(template)),
                Ok(None) => Ok(RawValue::Scalar(value.clone())),
                Err(message) => Err(BuildError::MalformedReference {
                    path: at.to_string(),
                    text: s.clone(),
                    message,
                }),
            }
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(idx, item)| raw_value(&format!("{at}.{idx}"), item))
            .collect::<Result<Vec<_>, _>>()
            .map(RawValue::List),
        Value::Object(map) => {
            let mut out = BTreeMap::new();
            for (key, item) in map {
                let nested = format!("{at}.{key}");
                check_key(&nested, key)?;
                out.insert(key.clone(), raw_value(&nested, item)?);
            }
            Ok(RawValue::Object(out))
        }
        scalar => Ok(RawValue::Scalar(scalar.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Reference;
    use serde_json::json;

    fn build(root: Value) -> Result<ScopeGraph, BuildError> {
        build_scope_graph(&Document::from_value(root))
    }

    #[test]
    fn test_map_form() {
        let graph = build(json!({
            "solutions": {"S": {
                "root": "/work",
                "projects": {"P": {
                    "cpu": "arm",
                    "configurations": {
                        "base": {"board": "x1"},
                        "debug": {"path": "/home/<$ref_board>"}
                    }
                }}
            }}
        }))
        .unwrap();

        assert_eq!(graph.len(), 4);
        let order: Vec<String> = graph.scopes().map(|n| n.path.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "solutions[S]",
                "solutions[S].projects[P]",
                "solutions[S].projects[P].configurations[base]",
                "solutions[S].projects[P].configurations[debug]",
            ]
        );

        let solution = graph.scope(&ScopePath::solution("S")).unwrap();
        assert!(solution.keys.contains_key("root"));
        assert!(!solution.keys.contains_key("projects"));

        let debug = graph
            .scope(&ScopePath::configuration("S", "P", "debug"))
            .unwrap();
        assert!(matches!(debug.keys.get("path"), Some(RawValue::Reference(_))));
    }

    #[test]
    fn test_list_form() {
        let graph = build(json!({
            "solutions": [{
                "name": "S",
                "projects": [{
                    "name": "P",
                    "configurations": [{"name": "debug", "opt": "-O0"}]
                }]
            }]
        }))
        .unwrap();

        let debug = graph
            .scope(&ScopePath::configuration("S", "P", "debug"))
            .unwrap();
        assert_eq!(debug.keys.get("opt"), Some(&RawValue::Scalar(json!("-O0"))));
        assert_eq!(graph.solutions().collect::<Vec<_>>(), vec!["S"]);
    }

    #[test]
    fn test_duplicate_names_in_list() {
        let result = build(json!({
            "solutions": [{
                "name": "S",
                "projects": [
                    {"name": "P", "configurations": {}},
                    {"name": "P", "configurations": {}}
                ]
            }]
        }));
        assert!(matches!(
            result,
            Err(BuildError::DuplicateScope { kind: ScopeKind::Project, ref name, .. }) if name == "P"
        ));
    }

    #[test]
    fn test_invalid_shapes() {
        for root in [
            json!([]),
            json!({"projects": {}}),
            json!({"solutions": "S"}),
            json!({"solutions": {"S": {"other": 1}}}),
            json!({"solutions": {"S": {"projects": {"P": {"configurations": {"C": 5}}}}}}),
            json!({"solutions": [{"projects": {}}]}),
        ] {
            assert!(
                matches!(build(root.clone()), Err(BuildError::InvalidScopeShape { .. })),
                "expected {root} to be rejected"
            );
        }
    }

    #[test]
    fn test_derivation_pointer() {
        let graph = build(json!({
            "solutions": {"S": {"projects": {"P": {"configurations": {
                "base": {"board": "x1"},
                "debug": {"data": "<$derived_from_solutions[].projects[].configurations[base]>"},
                "other": {"data": "<$derived_from_solutions[T].projects[Q]>"}
            }}}}}
        }))
        .unwrap();

        let debug = graph
            .scope(&ScopePath::configuration("S", "P", "debug"))
            .unwrap();
        assert_eq!(
            debug.derivation().map(|d| &d.target),
            Some(&ScopePath::configuration("S", "P", "base"))
        );
        assert_eq!(debug.value_keys().count(), 0);
        assert!(!debug.has_value_key("data"));

        let other = graph
            .scope(&ScopePath::configuration("S", "P", "other"))
            .unwrap();
        assert_eq!(
            other.derivation().map(|d| &d.target),
            Some(&ScopePath::project("T", "Q"))
        );
    }

    #[test]
    fn test_derivation_outside_configuration() {
        let result = build(json!({
            "solutions": {"S": {"projects": {"P": {
                "data": "<$derived_from_solutions[S].projects[P].configurations[x]>",
                "configurations": {}
            }}}}
        }));
        assert!(matches!(result, Err(BuildError::InvalidScopeShape { .. })));
    }

    #[test]
    fn test_plain_data_key_is_a_value() {
        let graph = build(json!({
            "solutions": {"S": {"projects": {"P": {"configurations": {
                "C": {"data": "payload"}
            }}}}}
        }))
        .unwrap();
        let node = graph.scope(&ScopePath::configuration("S", "P", "C")).unwrap();
        assert!(node.derivation().is_none());
        assert!(node.has_value_key("data"));
    }

    #[test]
    fn test_reference_in_key() {
        let result = build(json!({
            "solutions": {"S": {
                "env": {"<$ref_name>": "x"},
                "projects": {}
            }}
        }));
        assert!(matches!(
            result,
            Err(BuildError::ReferenceInKey { ref path, .. }) if path == "solutions[S].env.<$ref_name>"
        ));
    }

    #[test]
    fn test_malformed_reference() {
        let result = build(json!({
            "solutions": {"S": {"path": "/x/<$ref_board", "projects": {}}}
        }));
        assert!(matches!(
            result,
            Err(BuildError::MalformedReference { ref path, .. }) if path == "solutions[S].path"
        ));

        let misplaced = build(json!({
            "solutions": {"S": {"base": "<$derived_from_solutions[S].projects[P].configurations[C]>", "projects": {}}}
        }));
        assert!(matches!(misplaced, Err(BuildError::MalformedReference { .. })));
    }

    #[test]
    fn test_nested_references_preserved() {
        let graph = build(json!({
            "solutions": {"S": {
                "flags": ["-I<$ref_root>/inc", 3, {"tc": "<$ref_tool_chains[].path>"}],
                "projects": {}
            }}
        }))
        .unwrap();
        let node = graph.scope(&ScopePath::solution("S")).unwrap();
        let templates = node.keys["flags"].templates();
        assert_eq!(templates.len(), 2);
        assert!(matches!(
            templates[1].single_reference(),
            Some((_, Reference::Collection { .. }))
        ));
    }
}
