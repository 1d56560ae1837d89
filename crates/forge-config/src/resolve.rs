//! Lazy, memoized resolution of references and derivations.
//!
//! Every scope key and every whole scope is a [`Node`]. Nodes are evaluated
//! on demand from an explicit work stack: when an evaluation needs a node
//! that has no value yet it halts, the dependency is pushed, and the halted
//! node is evaluated again once the dependency settles. A dependency that is
//! still `Pending` is already on the stack, which closes a reference cycle.

use rayon::prelude::*;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

use crate::derivation::{self, Base, DerivationPlan};
use crate::error::ResolveError;
use crate::graph::{RawValue, ScopeGraph, ScopeNode};
use crate::reference::{Reference, Segment, Template};
use crate::selector::{CollectionSelector, MatchByIdentity, SelectionContext};
use crate::tree::ResolvedTree;
use forge_core::{ScopeKind, ScopePath};

/// A unit of resolution: one key of a scope, or a scope's whole key set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Node {
    Key { scope: ScopePath, key: String },
    Scope(ScopePath),
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Key { scope, key } => write!(f, "{}.{}", scope, key),
            Node::Scope(scope) => write!(f, "{}", scope),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeState {
    Pending,
    Done(Value),
    Failed,
}

/// Memoized node states for one resolution pass.
#[derive(Debug, Default)]
pub(crate) struct ResolutionCache {
    states: HashMap<Node, NodeState>,
}

impl ResolutionCache {
    fn state(&self, node: &Node) -> Option<&NodeState> {
        self.states.get(node)
    }

    fn len(&self) -> usize {
        self.states.len()
    }

    fn set(&mut self, node: Node, state: NodeState) {
        self.states.insert(node, state);
    }
}

/// Why an evaluation stopped before producing a value.
enum Halt {
    /// Needs this node's value first.
    Blocked(Node),
    /// A dependency failed; its error is already recorded.
    Poisoned,
    Failed(ResolveError),
}

type Step<T> = Result<T, Halt>;

struct Resolver<'g> {
    graph: &'g ScopeGraph,
    plan: &'g DerivationPlan,
    selector: &'g dyn CollectionSelector,
    cache: ResolutionCache,
    errors: Vec<ResolveError>,
}

impl<'g> Resolver<'g> {
    fn new(
        graph: &'g ScopeGraph,
        plan: &'g DerivationPlan,
        selector: &'g dyn CollectionSelector,
    ) -> Self {
        Self {
            graph,
            plan,
            selector,
            cache: ResolutionCache::default(),
            errors: Vec::new(),
        }
    }

    /// Resolve every key, then the whole key set, of each scope.
    fn run<'s>(&mut self, scopes: impl IntoIterator<Item = &'s ScopeNode>) {
        for node in scopes {
            for (key, _) in node.value_keys() {
                self.demand(Node::Key {
                    scope: node.path.clone(),
                    key: key.clone(),
                });
            }
            self.demand(Node::Scope(node.path.clone()));
        }
    }

    /// Resolved scope key sets and the errors found.
    fn finish(self) -> (BTreeMap<ScopePath, Value>, Vec<ResolveError>) {
        debug!(nodes = self.cache.len(), errors = self.errors.len(), "resolver finished");
        let scopes = self
            .cache
            .states
            .into_iter()
            .filter_map(|(node, state)| match (node, state) {
                (Node::Scope(scope), NodeState::Done(value)) => Some((scope, value)),
                _ => None,
            })
            .collect();
        (scopes, self.errors)
    }

    fn demand(&mut self, root: Node) {
        if self.cache.state(&root).is_some() {
            return;
        }
        self.cache.set(root.clone(), NodeState::Pending);
        let mut stack = vec![root];

        while let Some(top) = stack.last().cloned() {
            match self.evaluate(&top) {
                Ok(value) => {
                    self.cache.set(top, NodeState::Done(value));
                    stack.pop();
                }
                Err(Halt::Blocked(dep)) => {
                    if matches!(self.cache.state(&dep), Some(NodeState::Pending)) {
                        let start = stack.iter().position(|n| n == &dep).unwrap_or(0);
                        let mut chain: Vec<String> =
                            stack[start..].iter().map(ToString::to_string).collect();
                        chain.push(dep.to_string());
                        warn!(chain = %chain.join(" -> "), "cyclic reference");
                        self.errors.push(ResolveError::CyclicReference { chain });
                        self.cache.set(top, NodeState::Failed);
                        stack.pop();
                    } else {
                        self.cache.set(dep.clone(), NodeState::Pending);
                        stack.push(dep);
                    }
                }
                Err(Halt::Poisoned) => {
                    self.cache.set(top, NodeState::Failed);
                    stack.pop();
                }
                Err(Halt::Failed(error)) => {
                    debug!(node = %top, %error, "resolution failed");
                    self.errors.push(error);
                    self.cache.set(top, NodeState::Failed);
                    stack.pop();
                }
            }
        }
    }

    fn fetch(&self, node: Node) -> Step<Value> {
        match self.cache.state(&node) {
            Some(NodeState::Done(value)) => Ok(value.clone()),
            Some(NodeState::Failed) => Err(Halt::Poisoned),
            Some(NodeState::Pending) | None => Err(Halt::Blocked(node)),
        }
    }

    fn evaluate(&self, node: &Node) -> Step<Value> {
        match node {
            Node::Key { scope, key } => self.evaluate_key(scope, key),
            Node::Scope(scope) => self.evaluate_scope(scope),
        }
    }

    fn evaluate_key(&self, scope: &ScopePath, key: &str) -> Step<Value> {
        let origin = scope.key(key).to_string();
        let missing = || {
            Halt::Failed(ResolveError::UnknownReferenceTarget {
                path: origin.clone(),
                reference: key.to_string(),
            })
        };
        let node = self.graph.scope(scope).ok_or_else(missing)?;

        if let Some(raw) = node.keys.get(key).filter(|_| node.has_value_key(key)) {
            return self.evaluate_raw(raw, scope, &origin);
        }

        // Inherited keys are resolved in the context of the base.
        match self.plan.base(scope) {
            Base::Derived(base) => self.fetch(Node::Key {
                scope: base.clone(),
                key: key.to_string(),
            }),
            Base::Broken => Err(Halt::Poisoned),
            Base::None => Err(missing()),
        }
    }

    fn evaluate_scope(&self, scope: &ScopePath) -> Step<Value> {
        let node = self.graph.scope(scope).ok_or_else(|| {
            Halt::Failed(ResolveError::UnknownReferenceTarget {
                path: scope.to_string(),
                reference: scope.to_string(),
            })
        })?;

        let mut map = match self.plan.base(scope) {
            Base::Derived(base) => match self.fetch(Node::Scope(base.clone()))? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            Base::Broken => return Err(Halt::Poisoned),
            Base::None => Map::new(),
        };

        for (key, _) in node.value_keys() {
            let value = self.fetch(Node::Key {
                scope: scope.clone(),
                key: key.clone(),
            })?;
            map.insert(key.clone(), value);
        }
        Ok(Value::Object(map))
    }

    /// Whether `key` is defined on `scope`, directly or through its bases.
    fn has_key(&self, scope: &ScopePath, key: &str) -> Step<bool> {
        let mut current = scope.clone();
        loop {
            let Some(node) = self.graph.scope(&current) else {
                return Ok(false);
            };
            if node.has_value_key(key) {
                return Ok(true);
            }
            match self.plan.base(&current) {
                Base::Derived(base) => current = base.clone(),
                Base::Broken => return Err(Halt::Poisoned),
                Base::None => return Ok(false),
            }
        }
    }

    fn evaluate_raw(&self, raw: &RawValue, scope: &ScopePath, origin: &str) -> Step<Value> {
        match raw {
            RawValue::Scalar(value) => Ok(value.clone()),
            RawValue::List(items) => items
                .iter()
                .map(|item| self.evaluate_raw(item, scope, origin))
                .collect::<Step<Vec<_>>>()
                .map(Value::Array),
            RawValue::Object(entries) => {
                let mut out = Map::new();
                for (key, item) in entries {
                    out.insert(key.clone(), self.evaluate_raw(item, scope, origin)?);
                }
                Ok(Value::Object(out))
            }
            RawValue::Reference(template) => self.evaluate_template(template, scope, origin),
            RawValue::Derivation(derivation) => Ok(Value::String(derivation.raw.clone())),
        }
    }

    fn evaluate_template(&self, template: &Template, scope: &ScopePath, origin: &str) -> Step<Value> {
        if let Some((text, reference)) = template.single_reference() {
            return self.dereference(reference, text, scope, origin);
        }

        let mut out = String::with_capacity(template.raw.len());
        for segment in &template.segments {
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Reference { text, reference } => {
                    match self.dereference(reference, text, scope, origin)? {
                        Value::String(s) => out.push_str(&s),
                        other => out.push_str(&other.to_string()),
                    }
                }
            }
        }
        Ok(Value::String(out))
    }

    fn dereference(
        &self,
        reference: &Reference,
        text: &str,
        scope: &ScopePath,
        origin: &str,
    ) -> Step<Value> {
        let unknown = || {
            Halt::Failed(ResolveError::UnknownReferenceTarget {
                path: origin.to_string(),
                reference: text.to_string(),
            })
        };

        match reference {
            Reference::Local { key, fields } => {
                let mut current = Some(scope.clone());
                while let Some(candidate) = current {
                    if self.has_key(&candidate, key)? {
                        let value = self.fetch(Node::Key {
                            scope: candidate,
                            key: key.clone(),
                        })?;
                        return navigate(value, fields).ok_or_else(unknown);
                    }
                    current = candidate.parent();
                }
                Err(unknown())
            }

            Reference::Collection {
                collection,
                field,
                fields,
            } => {
                if let Some(kind) = ScopeKind::from_collection(collection) {
                    let target = scope.ancestor(kind).ok_or_else(unknown)?;
                    if !self.has_key(&target, field)? {
                        return Err(unknown());
                    }
                    let value = self.fetch(Node::Key {
                        scope: target,
                        key: field.clone(),
                    })?;
                    return navigate(value, fields).ok_or_else(unknown);
                }

                let mut current = Some(scope.clone());
                while let Some(candidate) = current {
                    if self.has_key(&candidate, collection)? {
                        let entries = self.fetch(Node::Key {
                            scope: candidate.clone(),
                            key: collection.clone(),
                        })?;
                        if !(entries.is_array() || entries.is_object()) {
                            return Err(Halt::Failed(ResolveError::TypeMismatch {
                                path: origin.to_string(),
                                message: format!(
                                    "'{collection}' in {candidate} is not a list or object"
                                ),
                            }));
                        }
                        let identity = self.identity(scope)?;
                        let ctx = SelectionContext {
                            scope,
                            identity: &identity,
                        };
                        let entry = self.selector.select(&entries, &ctx).ok_or_else(unknown)?;
                        let value = entry.get(field).cloned().ok_or_else(unknown)?;
                        return navigate(value, fields).ok_or_else(unknown);
                    }
                    current = candidate.parent();
                }
                Err(unknown())
            }

            Reference::Explicit(path) => {
                let target = path.scope();
                if !self.graph.contains(target) {
                    return Err(unknown());
                }
                let Some((first, rest)) = path.key().split_first() else {
                    return self.fetch(Node::Scope(target.clone()));
                };
                if !self.has_key(target, first)? {
                    return Err(unknown());
                }
                let value = self.fetch(Node::Key {
                    scope: target.clone(),
                    key: first.clone(),
                })?;
                navigate(value, rest).ok_or_else(unknown)
            }
        }
    }

    /// The scope's identity for collection selection.
    fn identity(&self, scope: &ScopePath) -> Step<String> {
        let key = self.selector.identity_key();
        if self.has_key(scope, key)? {
            let value = self.fetch(Node::Key {
                scope: scope.clone(),
                key: key.to_string(),
            })?;
            if let Value::String(identity) = value {
                return Ok(identity);
            }
        }
        Ok(scope.name().to_string())
    }
}

/// Walk into a resolved value by object key or array index.
fn navigate(value: Value, fields: &[String]) -> Option<Value> {
    let mut current = value;
    for field in fields {
        current = match current {
            Value::Object(mut map) => map.remove(field)?,
            Value::Array(mut items) => {
                let idx: usize = field.parse().ok()?;
                if idx >= items.len() {
                    return None;
                }
                items.swap_remove(idx)
            }
            _ => return None,
        };
    }
    Some(current)
}

fn complete(
    scopes: BTreeMap<ScopePath, Value>,
    errors: Vec<ResolveError>,
) -> Result<ResolvedTree, Vec<ResolveError>> {
    if !errors.is_empty() {
        warn!(errors = errors.len(), "resolution failed");
        return Err(errors);
    }
    info!(scopes = scopes.len(), "resolved solution tree");
    Ok(ResolvedTree::assemble(scopes))
}

/// Resolve a scope graph with the default collection selector.
pub fn resolve(graph: &ScopeGraph) -> Result<ResolvedTree, Vec<ResolveError>> {
    resolve_with(graph, &MatchByIdentity::default())
}

/// Resolve a scope graph, choosing collection entries with `selector`.
pub fn resolve_with(
    graph: &ScopeGraph,
    selector: &dyn CollectionSelector,
) -> Result<ResolvedTree, Vec<ResolveError>> {
    let plan = derivation::plan(graph);
    let mut resolver = Resolver::new(graph, &plan, selector);
    resolver.run(graph.scopes());
    let (scopes, errors) = resolver.finish();

    let mut all = plan.errors.clone();
    all.extend(errors);
    complete(scopes, all)
}

/// Resolve independent solutions on the rayon pool, one cache each.
///
/// Solutions linked by explicit references or derivations share a group.
/// The tree is identical to [`resolve_with`]; errors are grouped per
/// solution group.
pub fn resolve_parallel(
    graph: &ScopeGraph,
    selector: &dyn CollectionSelector,
) -> Result<ResolvedTree, Vec<ResolveError>> {
    let plan = derivation::plan(graph);
    let groups = independent_groups(graph, &plan);
    debug!(groups = groups.len(), "resolving solution groups in parallel");

    let results: Vec<_> = groups
        .par_iter()
        .map(|group| {
            let mut resolver = Resolver::new(graph, &plan, selector);
            resolver.run(group.iter().flat_map(|s| graph.solution_scopes(s)));
            resolver.finish()
        })
        .collect();

    let mut scopes = BTreeMap::new();
    let mut errors = plan.errors.clone();
    for (group_scopes, group_errors) in results {
        scopes.extend(group_scopes);
        errors.extend(group_errors);
    }
    complete(scopes, errors)
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Partition solutions so that no reference or derivation crosses groups.
fn independent_groups(graph: &ScopeGraph, plan: &DerivationPlan) -> Vec<Vec<String>> {
    let solutions: Vec<&str> = graph.solutions().collect();
    let index: HashMap<&str, usize> = solutions
        .iter()
        .enumerate()
        .map(|(i, s)| (*s, i))
        .collect();
    let mut sets = UnionFind::new(solutions.len());

    for node in graph.scopes() {
        let Some(&own) = index.get(node.path.solution_name()) else {
            continue;
        };
        let mut linked: Vec<&str> = node
            .keys
            .values()
            .flat_map(RawValue::templates)
            .flat_map(Template::references)
            .filter_map(|r| match r {
                Reference::Explicit(path) => Some(path.scope().solution_name()),
                _ => None,
            })
            .collect();
        if let Base::Derived(target) = plan.base(&node.path) {
            linked.push(target.solution_name());
        }
        for other in linked {
            if let Some(&other) = index.get(other) {
                sets.union(own, other);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (i, solution) in solutions.iter().enumerate() {
        let root = sets.find(i);
        groups.entry(root).or_default().push(solution.to_string());
    }
    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::graph::build_scope_graph;
    use forge_core::QualifiedPath;
    use serde_json::json;

    fn graph(root: Value) -> ScopeGraph {
        build_scope_graph(&Document::from_value(root)).unwrap()
    }

    fn get<'t>(tree: &'t ResolvedTree, path: &str) -> &'t Value {
        tree.get(&path.parse::<QualifiedPath>().unwrap()).unwrap()
    }

    fn single_project(configurations: Value) -> ScopeGraph {
        graph(json!({
            "solutions": {"S": {"projects": {"P": {"configurations": configurations}}}}
        }))
    }

    #[test]
    fn test_derivation_scenario() {
        let graph = graph(json!({"solutions":{"S":{"projects":{"P":{"configurations":{
            "base":{"board":"x1"},
            "debug":{"data":"<$derived_from_solutions[S].projects[P].configurations[base]>","opt":"-O0"}
        }}}}}}));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[debug]"),
            &json!({"board": "x1", "opt": "-O0"})
        );
    }

    #[test]
    fn test_interpolation_scenario() {
        let graph = single_project(json!({"C": {"board": "x1", "path": "/home/<$ref_board>"}}));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[C].path"),
            "/home/x1"
        );
    }

    #[test]
    fn test_single_reference_keeps_type() {
        let graph = single_project(json!({"C": {
            "jobs": 8,
            "flags": {"lto": true},
            "copy": "<$ref_jobs>",
            "nested": "<$ref_flags>",
            "text": "-j<$ref_jobs> <$ref_flags>"
        }}));
        let tree = resolve(&graph).unwrap();
        let c = "solutions[S].projects[P].configurations[C]";
        assert_eq!(get(&tree, &format!("{c}.copy")), &json!(8));
        assert_eq!(get(&tree, &format!("{c}.nested")), &json!({"lto": true}));
        assert_eq!(get(&tree, &format!("{c}.text")), &json!(r#"-j8 {"lto":true}"#));
    }

    #[test]
    fn test_structures_resolve_element_wise() {
        let graph = single_project(json!({"C": {
            "root": "/src",
            "includes": ["<$ref_root>/inc", {"gen": "<$ref_root>/gen"}, 4]
        }}));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[C].includes"),
            &json!(["/src/inc", {"gen": "/src/gen"}, 4])
        );
    }

    #[test]
    fn test_local_then_outer_shadowing() {
        let graph = graph(json!({"solutions": {"S": {
            "level": "solution",
            "sdk": "/sdk",
            "projects": {"P": {
                "level": "project",
                "arch": "arm",
                "see_level": "<$ref_level>",
                "configurations": {
                    "own": {"level": "configuration", "v": "<$ref_level>"},
                    "inherit": {"v": "<$ref_level>", "a": "<$ref_arch>", "s": "<$ref_sdk>"}
                }
            }}
        }}}));
        let tree = resolve(&graph).unwrap();
        let p = "solutions[S].projects[P]";
        assert_eq!(get(&tree, &format!("{p}.configurations[own].v")), "configuration");
        assert_eq!(get(&tree, &format!("{p}.configurations[inherit].v")), "project");
        assert_eq!(get(&tree, &format!("{p}.configurations[inherit].a")), "arm");
        assert_eq!(get(&tree, &format!("{p}.configurations[inherit].s")), "/sdk");
        assert_eq!(get(&tree, &format!("{p}.see_level")), "project");
    }

    #[test]
    fn test_explicit_reference_independent_of_issuer() {
        let explicit = "<$ref_solutions[S].projects[P].configurations[base].board>";
        let graph = graph(json!({"solutions": {
            "S": {
                "board": "solution-board",
                "from_solution": explicit,
                "projects": {"P": {
                    "board": "project-board",
                    "from_project": explicit,
                    "configurations": {
                        "base": {"board": "x1"},
                        "other": {"board": "x2", "from_config": explicit}
                    }
                }}
            },
            "T": {"from_other": explicit, "projects": {}}
        }}));
        let tree = resolve(&graph).unwrap();
        for path in [
            "solutions[S].from_solution",
            "solutions[S].projects[P].from_project",
            "solutions[S].projects[P].configurations[other].from_config",
            "solutions[T].from_other",
        ] {
            assert_eq!(get(&tree, path), "x1", "at {path}");
        }
    }

    #[test]
    fn test_explicit_scope_reference() {
        let graph = single_project(json!({
            "base": {"board": "x1", "opt": "-O2"},
            "C": {"snapshot": "<$ref_solutions[S].projects[P].configurations[base]>"}
        }));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[C].snapshot"),
            &json!({"board": "x1", "opt": "-O2"})
        );
    }

    #[test]
    fn test_derivation_override_law() {
        let graph = single_project(json!({
            "base": {"x": "base-x", "y": "base-y", "nested": {"a": 1, "b": 2}},
            "child": {
                "data": "<$derived_from_solutions[S].projects[P].configurations[base]>",
                "x": "child-x",
                "nested": {"a": 10},
                "z": "child-z"
            }
        }));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[child]"),
            &json!({"x": "child-x", "y": "base-y", "nested": {"a": 10}, "z": "child-z"})
        );
    }

    #[test]
    fn test_inherited_values_resolved_in_base_context() {
        let graph = single_project(json!({
            "base": {"board": "x1", "path": "/boards/<$ref_board>"},
            "debug": {
                "data": "<$derived_from_solutions[].projects[].configurations[base]>",
                "board": "x2",
                "copy": "<$ref_path>"
            }
        }));
        let tree = resolve(&graph).unwrap();
        let debug = "solutions[S].projects[P].configurations[debug]";
        assert_eq!(get(&tree, &format!("{debug}.path")), "/boards/x1");
        assert_eq!(get(&tree, &format!("{debug}.copy")), "/boards/x1");
    }

    #[test]
    fn test_derivation_chain() {
        let graph = single_project(json!({
            "a": {"one": 1},
            "b": {"data": "<$derived_from_solutions[S].projects[P].configurations[a]>", "two": 2},
            "c": {"data": "<$derived_from_solutions[S].projects[P].configurations[b]>", "three": "<$ref_one>"}
        }));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[c]"),
            &json!({"one": 1, "two": 2, "three": 1})
        );
    }

    #[test]
    fn test_reference_cycle_names_both_paths() {
        let graph = single_project(json!({"C": {"a": "<$ref_b>", "b": "<$ref_a>"}}));
        let errors = resolve(&graph).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ResolveError::CyclicReference { chain } => {
                let c = "solutions[S].projects[P].configurations[C]";
                assert_eq!(
                    chain,
                    &vec![format!("{c}.a"), format!("{c}.b"), format!("{c}.a")]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_cycle() {
        let graph = single_project(json!({"C": {"path": "<$ref_path>/sub"}}));
        let errors = resolve(&graph).unwrap_err();
        assert!(matches!(
            &errors[..],
            [ResolveError::CyclicReference { chain }] if chain.len() == 2
        ));
    }

    #[test]
    fn test_cycle_through_scope_reference() {
        let graph = single_project(json!({
            "C": {"me": "<$ref_solutions[S].projects[P].configurations[C]>"}
        }));
        let errors = resolve(&graph).unwrap_err();
        assert!(matches!(&errors[..], [ResolveError::CyclicReference { .. }]));
    }

    #[test]
    fn test_long_reference_chain_does_not_overflow() {
        let mut keys = Map::new();
        keys.insert("k0".to_string(), json!("end"));
        for i in 1..20_000 {
            keys.insert(format!("k{i}"), json!(format!("<$ref_k{}>", i - 1)));
        }
        let graph = single_project(json!({"C": keys}));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[P].configurations[C].k19999"),
            "end"
        );
    }

    #[test]
    fn test_derivation_cycle_single_error() {
        let graph = single_project(json!({
            "a": {"data": "<$derived_from_solutions[S].projects[P].configurations[b]>", "x": 1},
            "b": {"data": "<$derived_from_solutions[S].projects[P].configurations[a]>", "y": 2}
        }));
        let errors = resolve(&graph).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ResolveError::CyclicDerivation { chain } => {
                assert!(chain.iter().any(|p| p.ends_with("configurations[a]")));
                assert!(chain.iter().any(|p| p.ends_with("configurations[b]")));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_errors_accumulate_once_per_root_cause() {
        let graph = single_project(json!({
            "C": {
                "bad": "<$ref_missing>",
                "uses_bad": "<$ref_bad>/x",
                "also_bad": "<$ref_solutions[S].projects[nope].configurations[C].k>",
                "fine": "ok"
            }
        }));
        let errors = resolve(&graph).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ResolveError::UnknownReferenceTarget { .. })));
        assert!(errors.iter().any(|e| matches!(
            e,
            ResolveError::UnknownReferenceTarget { reference, .. } if reference == "missing"
        )));
    }

    #[test]
    fn test_derivation_to_project_is_type_mismatch() {
        let graph = single_project(json!({
            "C": {"data": "<$derived_from_solutions[S].projects[P]>", "x": 1}
        }));
        let errors = resolve(&graph).unwrap_err();
        assert!(matches!(&errors[..], [ResolveError::TypeMismatch { .. }]));
    }

    #[test]
    fn test_enclosing_collection_references() {
        let graph = graph(json!({"solutions": {"S": {
            "root": "/work",
            "projects": {"fw": {
                "cpu": "m4",
                "configurations": {"debug": {
                    "board": "x1",
                    "out": "<$ref_solutions[].root>/<$ref_projects[].cpu>/<$ref_configurations[].board>"
                }}
            }}
        }}}));
        let tree = resolve(&graph).unwrap();
        assert_eq!(
            get(&tree, "solutions[S].projects[fw].configurations[debug].out"),
            "/work/m4/x1"
        );
    }

    #[test]
    fn test_named_collection_selection() {
        let graph = graph(json!({"solutions": {"S": {
            "tool_chains": [
                {"name": "arm", "path": "/opt/arm", "bin": {"cc": "arm-gcc"}},
                {"name": "host", "path": "/usr", "bin": {"cc": "gcc"}}
            ],
            "projects": {
                "arm": {"cc": "<$ref_tool_chains[].bin.cc>", "configurations": {}},
                "tools": {
                    "name": "host",
                    "tc": "<$ref_tool_chains[].path>",
                    "configurations": {}
                }
            }
        }}}));
        let tree = resolve(&graph).unwrap();
        assert_eq!(get(&tree, "solutions[S].projects[arm].cc"), "arm-gcc");
        assert_eq!(get(&tree, "solutions[S].projects[tools].tc"), "/usr");
    }

    #[test]
    fn test_custom_selector() {
        #[derive(Debug)]
        struct First;

        impl CollectionSelector for First {
            fn identity_key(&self) -> &str {
                "name"
            }

            fn select<'v>(&self, collection: &'v Value, _ctx: &SelectionContext<'_>) -> Option<&'v Value> {
                collection.as_array().and_then(|items| items.first())
            }
        }

        let graph = single_project(json!({"C": {
            "boards": [{"id": "x1"}, {"id": "x2"}],
            "board": "<$ref_boards[].id>"
        }}));
        let tree = resolve_with(&graph, &First).unwrap();
        assert_eq!(get(&tree, "solutions[S].projects[P].configurations[C].board"), "x1");
        assert!(resolve(&graph).is_err());
    }

    #[test]
    fn test_idempotent_output() {
        let graph = single_project(json!({
            "base": {"board": "x1", "flags": ["-O2", "<$ref_board>"]},
            "debug": {"data": "<$derived_from_solutions[S].projects[P].configurations[base]>", "opt": "-O0"}
        }));
        let first = resolve(&graph).unwrap().to_json_pretty().unwrap();
        let second = resolve(&graph).unwrap().to_json_pretty().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let graph = graph(json!({"solutions": {
            "A": {"v": 1, "projects": {"P": {"configurations": {"C": {"x": "<$ref_v>"}}}}},
            "B": {"w": "<$ref_solutions[A].v>", "projects": {}},
            "C": {"z": "independent", "projects": {"Q": {"configurations": {
                "base": {"k": 1},
                "d": {"data": "<$derived_from_solutions[].projects[].configurations[base]>"}
            }}}}
        }}));
        let selector = MatchByIdentity::default();
        let sequential = resolve_with(&graph, &selector).unwrap();
        let parallel = resolve_parallel(&graph, &selector).unwrap();
        assert_eq!(sequential, parallel);

        let plan = derivation::plan(&graph);
        assert_eq!(
            independent_groups(&graph, &plan),
            vec![
                vec!["A".to_string(), "B".to_string()],
                vec!["C".to_string()]
            ]
        );
    }

    #[test]
    fn test_parallel_reports_errors() {
        let graph = graph(json!({"solutions": {
            "A": {"bad": "<$ref_nope>", "projects": {}},
            "B": {"worse": "<$ref_never>", "projects": {}}
        }}));
        let errors = resolve_parallel(&graph, &MatchByIdentity::default()).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
