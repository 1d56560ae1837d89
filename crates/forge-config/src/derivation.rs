//! Static checks over derivation pointers.
//!
//! Derivation pointers never change during resolution, so the derivation
//! graph is checked once up front: every cycle is reported exactly once and
//! every configuration gets a known base.

use std::collections::HashMap;
use tracing::warn;

use crate::error::ResolveError;
use crate::graph::{DERIVATION_KEY, ScopeGraph};
use forge_core::{ScopeKind, ScopePath};

/// Where a configuration's inherited keys come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Base {
    None,
    Derived(ScopePath),
    /// Pointer is invalid or on a cycle; inherited keys cannot be produced.
    Broken,
}

/// Result of checking the derivation graph.
#[derive(Debug, Clone, Default)]
pub struct DerivationPlan {
    bases: HashMap<ScopePath, Base>,
    pub errors: Vec<ResolveError>,
}

impl DerivationPlan {
    pub fn base(&self, scope: &ScopePath) -> &Base {
        self.bases.get(scope).unwrap_or(&Base::None)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Check every derivation pointer in the graph.
pub fn plan(graph: &ScopeGraph) -> DerivationPlan {
    let mut plan = DerivationPlan::default();

    for node in graph.scopes() {
        let Some(derivation) = node.derivation() else {
            continue;
        };
        let at = node.path.key(DERIVATION_KEY).to_string();
        let target = &derivation.target;

        let base = if target.kind() != ScopeKind::Configuration {
            plan.errors.push(ResolveError::TypeMismatch {
                path: at,
                message: format!(
                    "derivation target {target} is a {}, expected a configuration",
                    target.kind()
                ),
            });
            Base::Broken
        } else if !graph.contains(target) {
            plan.errors.push(ResolveError::UnknownReferenceTarget {
                path: at,
                reference: derivation.raw.clone(),
            });
            Base::Broken
        } else {
            Base::Derived(target.clone())
        };
        plan.bases.insert(node.path.clone(), base);
    }

    detect_cycles(graph, &mut plan);
    plan
}

/// Each configuration has at most one base, so every walk follows a single
/// chain; meeting a node still being visited closes a new cycle.
fn detect_cycles(graph: &ScopeGraph, plan: &mut DerivationPlan) {
    let mut marks: HashMap<ScopePath, Mark> = HashMap::new();
    let mut cycles = Vec::new();

    for node in graph.scopes() {
        let mut chain: Vec<ScopePath> = Vec::new();
        let mut current = Some(node.path.clone());

        while let Some(scope) = current.take() {
            match marks.get(&scope) {
                Some(Mark::Done) => break,
                Some(Mark::Visiting) => {
                    let start = chain.iter().position(|s| s == &scope).unwrap_or(0);
                    cycles.push(chain[start..].to_vec());
                    break;
                }
                None => {}
            }
            marks.insert(scope.clone(), Mark::Visiting);
            current = match plan.base(&scope) {
                Base::Derived(target) => Some(target.clone()),
                Base::None | Base::Broken => None,
            };
            chain.push(scope);
        }

        for scope in chain {
            marks.insert(scope, Mark::Done);
        }
    }

    for cycle in cycles {
        let mut names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        if let Some(first) = names.first().cloned() {
            names.push(first);
        }
        warn!(chain = %names.join(" -> "), "cyclic derivation");
        plan.errors.push(ResolveError::CyclicDerivation { chain: names });
        for scope in cycle {
            plan.bases.insert(scope, Base::Broken);
        }
    }
}
