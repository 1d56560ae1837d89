//! Variable expansion for solution documents.
//!
//! Supports variables like:
//! - `$NAME` - bare variable
//! - `${NAME}` - braced variable, useful when followed by identifier chars
//!
//! Values come from explicit overrides first, then the process environment.
//! Unknown variables are left verbatim so later stages can still see them.
//! Reference markers (`<$ref_...>`, `<$include>`) are never expanded.

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context used while loading documents.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Explicit values, shadowing the environment
    pub overrides: HashMap<String, String>,
}

// Regex for matching ${NAME} and $NAME variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

impl VariableContext {
    /// Create a new empty variable context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        for (key, value) in std::env::vars() {
            self.env.insert(key, value);
        }
    }

    /// Add an override.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.overrides.insert(name.to_string(), value.into());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<&str> {
        self.overrides
            .get(var_name)
            .or_else(|| self.env.get(var_name))
            .map(String::as_str)
    }

    /// Expand all known variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let whole = caps.get(0).map(|m| (m.start(), m.as_str())).unwrap_or((0, ""));
                if input[..whole.0].ends_with('<') {
                    return whole.1.to_string();
                }
                let name = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .map(|m| m.as_str())
                    .unwrap_or_default();
                self.resolve(name)
                    .map(str::to_string)
                    .unwrap_or_else(|| whole.1.to_string())
            })
            .to_string()
    }

    /// Names of variables in a string that have no value.
    pub fn find_unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .filter(|caps| {
                caps.get(0)
                    .is_some_and(|m| !input[..m.start()].ends_with('<'))
            })
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str())
            .filter(|name| self.resolve(name).is_none())
            .map(str::to_string)
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_process_env(mut self) -> Self {
        self.ctx.populate_env();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.overrides.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
