//! Document loading and `<$include>` expansion.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::LoadError;
use crate::jsonc;
use crate::variables::VariableContext;

/// Prefix of a string value that splices another file in its place.
pub const INCLUDE_MARKER: &str = "<$include>";

/// Default bound on nested includes.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 32;

/// Loader behaviour switches.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Maximum number of nested includes below the entry file.
    pub max_include_depth: usize,
    /// Try the sibling `.json`/`.jsonc` file when the requested one is missing.
    pub extension_fallback: bool,
    /// Drop entries carrying IDE formatter directives.
    pub strip_formatter_hints: bool,
    /// Merge adjacent string literals and fold newlines inside strings.
    pub fold_multiline_strings: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
            extension_fallback: true,
            strip_formatter_hints: true,
            fold_multiline_strings: true,
        }
    }
}

/// A parsed solution description with all includes spliced in.
#[derive(Debug, Clone)]
pub struct Document {
    pub root: Value,
    /// Entry file (or pseudo path for in-memory text).
    pub source: PathBuf,
    /// Every file read, in load order.
    pub files: Vec<PathBuf>,
}

impl Document {
    /// Wrap an already parsed value.
    pub fn from_value(root: Value) -> Self {
        Self {
            root,
            source: PathBuf::from("<memory>"),
            files: Vec::new(),
        }
    }
}

/// Reads solution files and expands their includes.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    options: LoaderOptions,
    variables: Option<VariableContext>,
}

impl DocumentLoader {
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            options,
            variables: None,
        }
    }

    /// Expand `$VAR` / `${VAR}` in string values using this context.
    pub fn with_variables(mut self, variables: VariableContext) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Load an entry file and everything it includes.
    pub fn load(&self, entry: impl AsRef<Path>) -> Result<Document, LoadError> {
        let path = self.locate(entry.as_ref()).ok_or_else(|| LoadError::Io {
            path: entry.as_ref().to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        })?;
        let mut files = Vec::new();
        let root = self.load_file(&path, 0, &mut files)?;
        debug!(entry = %path.display(), files = files.len(), "loaded document");
        Ok(Document {
            root,
            source: path,
            files,
        })
    }

    /// Load in-memory text. Includes resolve relative to `origin`'s directory.
    pub fn load_str(&self, text: &str, origin: impl AsRef<Path>) -> Result<Document, LoadError> {
        let origin = origin.as_ref();
        let mut files = Vec::new();
        let value = self.prepare(self.parse(text, origin)?);
        let root = self.expand(value, origin, 0, &mut files)?;
        Ok(Document {
            root,
            source: origin.to_path_buf(),
            files,
        })
    }

    fn load_file(
        &self,
        path: &Path,
        depth: usize,
        files: &mut Vec<PathBuf>,
    ) -> Result<Value, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        files.push(path.to_path_buf());
        debug!(path = %path.display(), depth, "reading file");

        let value = self.prepare(self.parse(&text, path)?);
        self.expand(value, path, depth, files)
    }

    fn parse(&self, text: &str, path: &Path) -> Result<Value, LoadError> {
        jsonc::parse_with(text, path, self.options.fold_multiline_strings)
    }

    fn prepare(&self, value: Value) -> Value {
        let value = if self.options.strip_formatter_hints {
            jsonc::strip_formatter_hints(value)
        } else {
            value
        };
        match &self.variables {
            Some(vars) => interpolate_value(vars, value),
            None => value,
        }
    }

    /// Replace include directives inside `value`, which was read from `file`.
    fn expand(
        &self,
        value: Value,
        file: &Path,
        depth: usize,
        files: &mut Vec<PathBuf>,
    ) -> Result<Value, LoadError> {
        match value {
            Value::String(s) => match s.trim_start().strip_prefix(INCLUDE_MARKER) {
                Some(target) => self.include(target.trim(), file, depth, files),
                None => Ok(Value::String(s)),
            },
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.expand(item, file, depth, files))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    out.insert(key, self.expand(item, file, depth, files)?);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other),
        }
    }

    fn include(
        &self,
        target: &str,
        from: &Path,
        depth: usize,
        files: &mut Vec<PathBuf>,
    ) -> Result<Value, LoadError> {
        if depth + 1 > self.options.max_include_depth {
            return Err(LoadError::IncludeDepthExceeded {
                path: from.to_path_buf(),
                limit: self.options.max_include_depth,
            });
        }

        let base = from.parent().unwrap_or_else(|| Path::new("."));
        let candidate = base.join(target);
        let path = self
            .locate(&candidate)
            .ok_or_else(|| LoadError::IncludeNotFound {
                from: from.to_path_buf(),
                target: target.to_string(),
            })?;

        debug!(from = %from.display(), include = %path.display(), depth = depth + 1, "expanding include");
        self.load_file(&path, depth + 1, files)
    }

    /// The file itself if present, else its `.json`/`.jsonc` sibling.
    fn locate(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        if !self.options.extension_fallback {
            return None;
        }
        let sibling = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => path.with_extension("jsonc"),
            Some("jsonc") => path.with_extension("json"),
            _ => return None,
        };
        sibling.is_file().then_some(sibling)
    }
}

/// Load a solution entry file with default options.
pub fn load_document(entry: impl AsRef<Path>) -> Result<Document, LoadError> {
    DocumentLoader::default().load(entry)
}

fn interpolate_value(vars: &VariableContext, value: Value) -> Value {
    match value {
        Value::String(s) => {
            for name in vars.find_unresolved(&s) {
                debug!(variable = %name, "no value for variable, left verbatim");
            }
            Value::String(vars.interpolate(&s))
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|v| interpolate_value(vars, v))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, interpolate_value(vars, v)))
                .collect(),
        ),
        other => other,
    }
}
