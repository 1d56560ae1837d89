//! Reference and derivation expression grammar.
//!
//! Three reference forms are recognised inside `<$ref_...>` markers:
//! - `<$ref_KEY.sub>` - local, looked up in the issuing scope then outward
//! - `<$ref_COLLECTION[].FIELD>` - collection-relative
//! - `<$ref_solutions[S].projects[P].configurations[C].KEY>` - explicit
//!
//! A `data` key holding `<$derived_from_solutions[S].projects[P].configurations[C]>`
//! is a derivation pointer; empty names stand for the owner's own solution
//! or project.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use forge_core::QualifiedPath;

/// Opening text of every reference marker.
pub const REF_OPEN: &str = "<$ref";

/// Opening text of a derivation pointer.
pub const DERIVED_OPEN: &str = "<$derived_from_";

// Regex for matching complete <$ref_...> markers
static REF_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\$ref_([^<>]*)>").unwrap());

static COLLECTION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\[\]\.(.+)$").unwrap());

static DERIVATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^<\$derived_from_solutions\[([^\]]*)\](?:\.projects\[([^\]]*)\](?:\.configurations\[([^\]]*)\])?)?>$",
    )
    .unwrap()
});

/// A parsed reference expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// `KEY[.field...]`
    Local { key: String, fields: Vec<String> },
    /// `COLLECTION[].FIELD[.field...]`
    Collection {
        collection: String,
        field: String,
        fields: Vec<String>,
    },
    /// Fully qualified path, scope only or scope plus key.
    Explicit(QualifiedPath),
}

impl Reference {
    /// Parse the text between `<$ref_` and `>`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty reference".to_string());
        }

        if text.starts_with("solutions[") && !text.starts_with("solutions[]") {
            return text
                .parse::<QualifiedPath>()
                .map(Reference::Explicit)
                .map_err(|e| e.to_string());
        }

        if let Some(caps) = COLLECTION_REGEX.captures(text) {
            let mut segments = split_fields(&caps[2])?;
            let field = segments.remove(0);
            return Ok(Reference::Collection {
                collection: caps[1].to_string(),
                field,
                fields: segments,
            });
        }

        if text.contains('[') || text.contains(']') {
            return Err("brackets are only valid in collection or explicit references".to_string());
        }

        let mut segments = split_fields(text)?;
        let key = segments.remove(0);
        Ok(Reference::Local {
            key,
            fields: segments,
        })
    }
}

fn split_fields(text: &str) -> Result<Vec<String>, String> {
    let segments: Vec<String> = text.split('.').map(|s| s.trim().to_string()).collect();
    if segments.iter().any(String::is_empty) {
        return Err("empty key segment".to_string());
    }
    Ok(segments)
}

/// Piece of a string value that may embed references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Reference { text: String, reference: Reference },
}

/// A string value containing one or more references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub raw: String,
    pub segments: Vec<Segment>,
}

impl Template {
    /// The reference, if the whole string is exactly one marker.
    pub fn single_reference(&self) -> Option<(&str, &Reference)> {
        match self.segments.as_slice() {
            [Segment::Reference { text, reference }] => Some((text, reference)),
            _ => None,
        }
    }

    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Reference { reference, .. } => Some(reference),
            Segment::Literal(_) => None,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split a string into literals and references.
///
/// Returns `Ok(None)` for plain strings and an error message when a marker
/// is opened but never properly closed.
pub fn parse_template(value: &str) -> Result<Option<Template>, String> {
    let opened = value.matches(REF_OPEN).count();
    if opened == 0 {
        return Ok(None);
    }
    let complete = REF_REGEX.find_iter(value).count();
    if complete != opened {
        return Err("each reference must start with '<$ref_' and end with '>'".to_string());
    }

    let mut segments = Vec::new();
    let mut last = 0;
    for caps in REF_REGEX.captures_iter(value) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > last {
            segments.push(Segment::Literal(value[last..whole.start()].to_string()));
        }
        let text = caps[1].trim().to_string();
        let reference = Reference::parse(&text)?;
        segments.push(Segment::Reference { text, reference });
        last = whole.end();
    }
    if last < value.len() {
        segments.push(Segment::Literal(value[last..].to_string()));
    }

    Ok(Some(Template {
        raw: value.to_string(),
        segments,
    }))
}

/// Names captured from a derivation pointer; `None` means "the owner's own".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPointer {
    pub solution: Option<String>,
    pub project: Option<String>,
    pub configuration: Option<String>,
    /// Whether the pointer names a project / configuration segment at all.
    pub has_project: bool,
    pub has_configuration: bool,
}

/// Parse a `<$derived_from_...>` pointer.
pub fn parse_derivation(value: &str) -> Result<DerivationPointer, String> {
    let caps = DERIVATION_REGEX.captures(value.trim()).ok_or_else(|| {
        "expected '<$derived_from_solutions[S].projects[P].configurations[C]>'".to_string()
    })?;
    let name = |idx: usize| {
        caps.get(idx)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Ok(DerivationPointer {
        solution: name(1),
        project: name(2),
        configuration: name(3),
        has_project: caps.get(2).is_some(),
        has_configuration: caps.get(3).is_some(),
    })
}
