//! Manifest types for tool metadata
//!
//! A manifest is the immutable, declarative record of one tool: its stable
//! id, version, place in the executor chain, configuration template, caller
//! parameter schema, and (for runtimes) environment resolution rules.
//! Manifests are data. They are extracted from files, never executed, and
//! never mutated after extraction.

use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Kind of a tool within an executor chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    /// Terminal element: actually performs I/O (subprocess or HTTP)
    Primitive,
    /// Non-terminal element that contributes environment rules
    Runtime,
    /// Ordinary invokable tool
    User,
}

/// One tool's declarative metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    /// Stable opaque identifier, declared inside the manifest file
    pub tool_id: String,
    /// Semver version string
    pub version: String,
    pub tool_type: ToolType,
    /// `tool_id` of the next chain element, `None` on primitives
    #[serde(default)]
    pub executor_id: Option<String>,
    /// Organizational tag, also the lockfile subdirectory
    #[serde(default = "default_category")]
    pub category: String,
    /// Configuration template; string values may contain `${VAR}` forms
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,
    /// Schema for caller-supplied runtime parameters
    #[serde(default)]
    pub config_schema: ConfigSchema,
    /// Environment resolution rules; only meaningful on runtimes
    #[serde(default)]
    pub env_config: Option<EnvConfig>,
    /// Auth scope this tool needs to execute, if any
    #[serde(default)]
    pub required_scope: Option<String>,
}

fn default_category() -> String {
    "general".to_string()
}

impl ToolManifest {
    pub fn is_primitive(&self) -> bool {
        self.tool_type == ToolType::Primitive
    }

    pub fn is_runtime(&self) -> bool {
        self.tool_type == ToolType::Runtime
    }

    /// Parse the declared version as semver
    pub fn parsed_version(&self) -> Result<Version, semver::Error> {
        Version::parse(&self.version)
    }
}

/// Environment resolution rules declared by a runtime manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Interpreter resolvers, applied in order
    #[serde(default)]
    pub interpreter: Vec<ResolverRule>,
    /// Static variable assignments, applied in declaration order after the
    /// resolvers; values may reference earlier variables via `${VAR}` forms
    #[serde(default)]
    pub env: serde_json::Map<String, Value>,
    /// Overlay `KEY=VALUE` pairs from `<project>/.env` before resolving
    #[serde(default)]
    pub load_dotenv: bool,
}

/// A named strategy for locating an interpreter binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverRule {
    pub kind: ResolverKind,
    /// Variable the resolved path is assigned to (e.g. `KIWI_PYTHON`)
    pub var: String,
    /// Scopes probed in order; first existing path wins
    #[serde(default)]
    pub search: Vec<SearchScope>,
    /// Used when no scope yields a path
    #[serde(default)]
    pub fallback: String,
    /// Binary name for `system_binary` and `version_manager` kinds
    #[serde(default)]
    pub binary: Option<String>,
    /// Which version manager to consult (`version_manager` kind only)
    #[serde(default)]
    pub manager: Option<VersionManager>,
    /// Pinned manager version (`version_manager` kind only)
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverKind {
    VenvPython,
    NodeModules,
    SystemBinary,
    VersionManager,
}

/// Search scope for interpreter probing, highest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    /// `<project>/.venv` and friends
    Project,
    /// `<project>/.ai/scripts/.venv`
    Kiwi,
    /// `<user>/.ai/.venv`
    User,
    /// `PATH` lookup
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionManager {
    Rbenv,
    Nvm,
    Asdf,
}

/// Declarative schema for caller-supplied runtime parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSchema {
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
}

/// One parameter's declared shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl ConfigSchema {
    /// Validate caller params against the schema
    ///
    /// Checks that every required parameter is present, every supplied
    /// parameter is declared, and every value matches its declared type.
    /// Returns a human-readable description of the first set of violations.
    pub fn validate(&self, params: &serde_json::Map<String, Value>) -> Result<(), String> {
        let mut problems = Vec::new();

        for (name, spec) in &self.params {
            match params.get(name) {
                Some(value) => {
                    if !spec.param_type.matches(value) {
                        problems.push(format!(
                            "'{}' expects {}, got {}",
                            name,
                            spec.param_type.name(),
                            type_of(value)
                        ));
                    }
                }
                None if spec.required => {
                    problems.push(format!("missing required parameter '{}'", name));
                }
                None => {}
            }
        }

        for name in params.keys() {
            if !self.params.contains_key(name) {
                problems.push(format!("unknown parameter '{}'", name));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }

    /// Defaults declared in the schema for parameters the caller omitted
    pub fn defaults(&self) -> serde_json::Map<String, Value> {
        self.params
            .iter()
            .filter_map(|(name, spec)| spec.default.clone().map(|v| (name.clone(), v)))
            .collect()
    }
}

fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
