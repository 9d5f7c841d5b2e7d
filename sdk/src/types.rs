//! Execution result and option types

use crate::errors::{KernelError, KernelErrorExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one `execute` call
///
/// Failures carry a human message in `error` plus structured flags in
/// `metadata` (`error_kind`, `auth_required`, `lockfile_mismatch`,
/// `timed_out`, `cancelled`, ...) so callers never have to parse the
/// message text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Primitive payload: exit code and captured streams, or HTTP
    /// status/headers/body
    pub data: Value,
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl ExecutionResult {
    /// Create a successful result
    pub fn ok(data: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            data,
            duration_ms,
            error: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a failed result with a plain message
    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: Value::Null,
            duration_ms,
            error: Some(error.into()),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a failed result from a kernel error, stamping the structured
    /// flags callers dispatch on
    pub fn from_error(err: &KernelError, duration_ms: u64) -> Self {
        let mut result = Self::failed(err.to_string(), duration_ms);
        result
            .metadata
            .insert("error_kind".to_string(), Value::String(err.kind().into()));
        match err {
            KernelError::AuthenticationRequired { .. } | KernelError::ScopeUnavailable { .. } => {
                result.set_flag("auth_required", true);
            }
            KernelError::LockfileMismatch { .. } => {
                result.set_flag("lockfile_mismatch", true);
            }
            KernelError::Timeout => {
                result.set_flag("timed_out", true);
            }
            KernelError::Cancelled => {
                result.set_flag("cancelled", true);
            }
            _ => {}
        }
        result
    }

    /// Set a boolean metadata flag
    pub fn set_flag(&mut self, key: &str, value: bool) {
        self.metadata.insert(key.to_string(), Value::Bool(value));
    }

    /// Builder-style variant of [`set_flag`](Self::set_flag)
    pub fn with_flag(mut self, key: &str, value: bool) -> Self {
        self.set_flag(key, value);
        self
    }

    /// Read a boolean metadata flag, absent flags being `false`
    pub fn flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Lockfile enforcement mode for one `execute` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockfileMode {
    /// No lockfile is consulted
    Off,
    /// Drift is logged and flagged in result metadata; execution proceeds
    #[default]
    Warn,
    /// Drift or a missing lockfile fails the call before dispatch
    Strict,
}

/// One row of a `search` result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub tool_id: String,
    pub category: String,
    pub version: String,
}

/// Filter for `search` / `list`
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Substring match against `tool_id`
    pub query: Option<String>,
    /// Exact match against `category`
    pub category: Option<String>,
}

impl ListFilter {
    pub fn matches(&self, tool_id: &str, category: &str) -> bool {
        if let Some(query) = &self.query {
            if !tool_id.contains(query.as_str()) {
                return false;
            }
        }
        if let Some(want) = &self.category {
            if category != want {
                return false;
            }
        }
        true
    }
}
