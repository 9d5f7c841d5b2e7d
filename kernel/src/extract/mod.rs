//! Metadata extraction
//!
//! Parses manifest files into [`ToolManifest`] records. Two source kinds are
//! accepted: YAML documents, and Python modules declaring top-level
//! constants. Extraction is driven by one rule table shared by both kinds;
//! downstream code never branches on where a manifest came from.
//!
//! # Contract
//!
//! Extraction is pure with respect to file contents: the same bytes always
//! yield the same manifest. No code from the manifest file is ever executed.
//! For Python sources only static `NAME = <literal>` assignments at column
//! zero are read.

mod literal;

use sdk::errors::KernelError;
use sdk::manifest::ToolManifest;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// How one manifest field is extracted
struct FieldRule {
    name: &'static str,
    required: bool,
}

/// The extraction rule table, uniform across source kinds
const FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        name: "tool_id",
        required: true,
    },
    FieldRule {
        name: "version",
        required: true,
    },
    FieldRule {
        name: "tool_type",
        required: true,
    },
    FieldRule {
        name: "executor_id",
        required: false,
    },
    FieldRule {
        name: "category",
        required: false,
    },
    FieldRule {
        name: "config",
        required: false,
    },
    FieldRule {
        name: "config_schema",
        required: false,
    },
    FieldRule {
        name: "env_config",
        required: false,
    },
    FieldRule {
        name: "required_scope",
        required: false,
    },
];

/// Source kind of a manifest file, decided by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Yaml,
    Python,
}

impl SourceKind {
    /// Classify a path; `None` means the file is not a manifest candidate
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Some(Self::Yaml),
            Some("py") => Some(Self::Python),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    mtime: SystemTime,
    size: u64,
    manifest: Arc<ToolManifest>,
}

/// Manifest extractor with an optional metadata cache
///
/// The cache is keyed by `(path, mtime, size)` and is purely an
/// optimization; a changed file is always re-read.
pub struct Extractor {
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Extract a manifest from a file
    ///
    /// Fails with `MalformedManifest` (carrying the file path and the
    /// offending field) when the file cannot be parsed, a required field is
    /// missing, or a field has the wrong shape.
    pub fn extract(&self, path: &Path) -> Result<Arc<ToolManifest>, KernelError> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta.modified()?;
        let size = meta.len();

        {
            let cache = self.cache.lock().expect("extract cache lock poisoned");
            if let Some(entry) = cache.get(path) {
                if entry.mtime == mtime && entry.size == size {
                    tracing::debug!("Manifest cache hit: {}", path.display());
                    return Ok(Arc::clone(&entry.manifest));
                }
            }
        }

        let manifest = Arc::new(extract_uncached(path)?);

        let mut cache = self.cache.lock().expect("extract cache lock poisoned");
        cache.insert(
            path.to_path_buf(),
            CacheEntry {
                mtime,
                size,
                manifest: Arc::clone(&manifest),
            },
        );

        Ok(manifest)
    }

    /// Forget all cached manifests
    pub fn clear(&self) {
        self.cache
            .lock()
            .expect("extract cache lock poisoned")
            .clear();
    }
}

/// Extract a manifest straight from file bytes, bypassing the cache
pub fn extract_uncached(path: &Path) -> Result<ToolManifest, KernelError> {
    let kind = SourceKind::from_path(path).ok_or_else(|| malformed(path, "unsupported extension"))?;
    let text = std::fs::read_to_string(path)
        .map_err(|e| malformed(path, &format!("unreadable: {}", e)))?;

    let raw = match kind {
        SourceKind::Yaml => raw_from_yaml(path, &text)?,
        SourceKind::Python => raw_from_python(path, &text)?,
    };

    build_manifest(path, raw)
}

fn malformed(path: &Path, field: &str) -> KernelError {
    KernelError::MalformedManifest {
        path: path.to_path_buf(),
        field: field.to_string(),
    }
}

fn raw_from_yaml(path: &Path, text: &str) -> Result<serde_json::Map<String, Value>, KernelError> {
    let value: Value =
        serde_yaml::from_str(text).map_err(|e| malformed(path, &format!("invalid YAML: {}", e)))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(malformed(path, "document is not a mapping")),
    }
}

/// Collect top-level `NAME = <literal>` assignments from a Python module
///
/// Assignments must start at column zero. A literal opening `{`, `[`, `(`
/// or a triple-quoted string may continue across lines; everything else is
/// single-line. Lines that are not assignments (imports, defs, comments)
/// are skipped without being interpreted.
fn raw_from_python(path: &Path, text: &str) -> Result<serde_json::Map<String, Value>, KernelError> {
    let mut raw = serde_json::Map::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some((name, rest)) = split_assignment(line) else {
            continue;
        };
        if !FIELD_RULES.iter().any(|r| r.name == name) {
            continue;
        }

        let mut literal_text = rest.to_string();
        while !literal::is_complete(&literal_text) {
            match lines.next() {
                Some(next) => {
                    literal_text.push('\n');
                    literal_text.push_str(next);
                }
                None => return Err(malformed(path, &format!("unterminated literal for '{}'", name))),
            }
        }

        let value = literal::parse(&literal_text)
            .map_err(|e| malformed(path, &format!("field '{}': {}", name, e)))?;
        raw.insert(name.to_string(), value);
    }

    Ok(raw)
}

/// Split `NAME = rest` at column zero into its parts
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let first = line.chars().next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let eq = line.find('=')?;
    // Reject comparisons and augmented assignments
    let after = line.as_bytes().get(eq + 1).copied();
    let before = line.as_bytes().get(eq.wrapping_sub(1)).copied();
    if after == Some(b'=') || matches!(before, Some(b'!') | Some(b'<') | Some(b'>') | Some(b'+')) {
        return None;
    }
    let name = line[..eq].trim();
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return None;
    }
    Some((name, line[eq + 1..].trim()))
}

fn build_manifest(
    path: &Path,
    raw: serde_json::Map<String, Value>,
) -> Result<ToolManifest, KernelError> {
    let mut fields = serde_json::Map::new();
    for rule in FIELD_RULES {
        match raw.get(rule.name) {
            Some(value) => {
                fields.insert(rule.name.to_string(), value.clone());
            }
            None if rule.required => return Err(malformed(path, rule.name)),
            None => {}
        }
    }

    serde_json::from_value(Value::Object(fields))
        .map_err(|e| malformed(path, &e.to_string()))
}
