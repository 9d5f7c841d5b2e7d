//! Executor
//!
//! The orchestrator composing every other component into one call:
//! resolve the chain, verify integrity, validate the lockfile, merge and
//! template configs, validate caller params, inject credentials, dispatch
//! to the terminal primitive, and package the outcome.
//!
//! Per call the state machine is strictly forward:
//! `Resolving -> Verifying -> Validating -> Merging -> ResolvingEnv ->
//! Templating -> ValidatingParams -> Authenticating -> Executing`.
//! Cancellation is checked at every transition and propagated into the
//! primitive.

pub mod cancel;
pub mod chain;

pub use cancel::CancelHandle;

use crate::auth::{self, AuthStore};
use crate::env_resolver::{self, template, EnvMap, ResolveContext};
use crate::extract::Extractor;
use crate::integrity;
use crate::lockfile::{Lockfile, LockfileStore};
use crate::primitives::http::{HttpPrimitive, HttpRequest, RetryPolicy};
use crate::primitives::subprocess::{self, Capture, SubprocessRequest};
use crate::primitives::OutputSink;
use crate::scopes::{Scope, ScopeRoots};
use crate::store::ArtefactStore;
use chain::ResolvedChain;
use sdk::errors::KernelError;
use sdk::manifest::ToolManifest;
use sdk::types::{ExecutionResult, ListFilter, LockfileMode, ToolInfo};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Kernel-imposed ceiling on any dispatch timeout
pub const MAX_TIMEOUT_MS: u64 = 600_000;

/// Service credentials are resolved against in step 9
pub const DEFAULT_AUTH_SERVICE: &str = "supabase";

/// `tool_id` of the subprocess terminal primitive
pub const SUBPROCESS_PRIMITIVE: &str = "subprocess";

/// `tool_id` of the HTTP terminal primitive
pub const HTTP_PRIMITIVE: &str = "http_client";

/// Options for one `execute` call
pub struct ExecuteOptions {
    pub use_lockfile: LockfileMode,
    pub verify_integrity: bool,
    pub cancellation: CancelHandle,
    /// Caller tool-level env overlay, templated against the resolved env
    pub env: BTreeMap<String, String>,
    /// Streaming destination for subprocess stdout / HTTP bodies
    pub sink: Option<Box<dyn OutputSink>>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            use_lockfile: LockfileMode::Warn,
            verify_integrity: true,
            cancellation: CancelHandle::new(),
            env: BTreeMap::new(),
            sink: None,
        }
    }
}

/// States of the per-call machine, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolving,
    Verifying,
    Validating,
    Merging,
    ResolvingEnv,
    Templating,
    ValidatingParams,
    Authenticating,
    Executing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Resolving => "resolving",
            Phase::Verifying => "verifying",
            Phase::Validating => "validating",
            Phase::Merging => "merging",
            Phase::ResolvingEnv => "resolving-env",
            Phase::Templating => "templating",
            Phase::ValidatingParams => "validating-params",
            Phase::Authenticating => "authenticating",
            Phase::Executing => "executing",
        };
        write!(f, "{}", name)
    }
}

/// The tool execution kernel
///
/// Holds the process-scoped stores and exposes the four kernel entry points
/// (`execute`, `search`, `load`, `help`) plus lockfile freezing. Construct
/// one per embedding host; it is cheap to share behind an `Arc`.
pub struct Executor {
    store: Arc<ArtefactStore>,
    extractor: Arc<Extractor>,
    lockfiles: Arc<LockfileStore>,
    auth: Arc<AuthStore>,
    http: HttpPrimitive,
    auth_service: String,
}

impl Executor {
    pub fn new(roots: ScopeRoots) -> Self {
        let extractor = Arc::new(Extractor::new());
        Self {
            store: Arc::new(ArtefactStore::new(roots.clone(), Arc::clone(&extractor))),
            extractor,
            lockfiles: Arc::new(LockfileStore::new(roots)),
            auth: Arc::new(AuthStore::new()),
            http: HttpPrimitive::new(),
            auth_service: DEFAULT_AUTH_SERVICE.to_string(),
        }
    }

    /// Replace the default keychain-backed auth store
    pub fn with_auth_store(mut self, auth: Arc<AuthStore>) -> Self {
        self.auth = auth;
        self
    }

    /// Override the service credentials are resolved against
    pub fn with_auth_service(mut self, service: impl Into<String>) -> Self {
        self.auth_service = service.into();
        self
    }

    pub fn auth_store(&self) -> &Arc<AuthStore> {
        &self.auth
    }

    pub fn lockfile_store(&self) -> &Arc<LockfileStore> {
        &self.lockfiles
    }

    /// Execute a tool: the kernel's main entry point
    pub async fn execute(
        &self,
        tool_id: &str,
        params: serde_json::Map<String, Value>,
        mut options: ExecuteOptions,
    ) -> ExecutionResult {
        let start = Instant::now();
        let mut flags = serde_json::Map::new();

        let outcome = self.run(tool_id, params, &mut options, &mut flags).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let mut result = match outcome {
            Ok(data) => ExecutionResult::ok(data, duration_ms),
            Err(err) => {
                tracing::debug!("execute('{}') failed: {}", tool_id, err);
                let mut result = ExecutionResult::from_error(&err, duration_ms);
                // Nothing token-shaped may survive into caller-visible text
                result.error = result.error.map(|msg| auth::scrub(&msg));
                result
            }
        };
        for (key, value) in flags {
            result.metadata.insert(key, value);
        }
        result
    }

    async fn run(
        &self,
        tool_id: &str,
        params: serde_json::Map<String, Value>,
        options: &mut ExecuteOptions,
        flags: &mut serde_json::Map<String, Value>,
    ) -> Result<Value, KernelError> {
        let cancel = options.cancellation.clone();

        // Step 1: resolve the chain
        self.transition(&cancel, Phase::Resolving)?;
        let chain = chain::resolve_chain(&self.store, &self.extractor, tool_id)?;

        let root = &chain.root().manifest;
        let lockfile = if options.use_lockfile != LockfileMode::Off {
            self.lockfiles
                .load(&root.tool_id, &root.version, &root.category)?
        } else {
            None
        };

        // Step 2: integrity over every element with a known expected hash
        self.transition(&cancel, Phase::Verifying)?;
        if options.verify_integrity {
            for element in chain.elements() {
                let expected = lockfile
                    .as_ref()
                    .and_then(|l| l.hash_for(&element.manifest.tool_id, &element.manifest.version));
                if let Some(expected) = expected {
                    integrity::verify_file(&element.manifest.tool_id, &element.path, expected)?;
                }
            }
        }

        // Step 3: lockfile validation
        self.transition(&cancel, Phase::Validating)?;
        match (&lockfile, options.use_lockfile) {
            (Some(lockfile), mode) => {
                let validation = self.lockfiles.validate(lockfile, &chain)?;
                if !validation.ok {
                    if mode == LockfileMode::Strict {
                        return Err(KernelError::LockfileMismatch {
                            tool_id: root.tool_id.clone(),
                            version: root.version.clone(),
                            detail: validation.summary(),
                        });
                    }
                    flags.insert("lockfile_mismatch".to_string(), Value::Bool(true));
                }
            }
            (None, LockfileMode::Strict) => {
                return Err(KernelError::LockfileMissing {
                    tool_id: root.tool_id.clone(),
                    version: root.version.clone(),
                });
            }
            (None, _) => {}
        }

        // Steps 4-5: locate the primitive, merge configs root-to-terminal
        self.transition(&cancel, Phase::Merging)?;
        let terminal = chain.terminal().manifest.clone();
        let merged = merge_chain_configs(&chain);

        // Step 6: resolve the environment
        self.transition(&cancel, Phase::ResolvingEnv)?;
        let ctx = ResolveContext::from_process(self.store.roots());
        let mut env = match chain
            .first_runtime()
            .and_then(|e| e.manifest.env_config.clone())
        {
            Some(env_config) => env_resolver::resolve(&env_config, &ctx),
            None => ctx.base_env,
        };
        for (name, raw) in &options.env {
            let value = template::expand(raw, &env);
            env.insert(name.clone(), value);
        }

        // Step 7: template the merged config
        self.transition(&cancel, Phase::Templating)?;
        let templated = match template::expand_value(&Value::Object(merged), &env) {
            Value::Object(map) => map,
            _ => unreachable!("expanding an object yields an object"),
        };

        // Step 8: validate caller params, then overlay them
        self.transition(&cancel, Phase::ValidatingParams)?;
        terminal
            .config_schema
            .validate(&params)
            .map_err(KernelError::InvalidParams)?;
        let mut config = templated;
        for (name, value) in terminal.config_schema.defaults() {
            config.entry(name).or_insert(value);
        }
        for (name, value) in params {
            config.insert(name, value);
        }

        // Step 9: credential injection
        self.transition(&cancel, Phase::Authenticating)?;
        let auth_token = match chain.required_scope() {
            Some(scope) if terminal.tool_id == HTTP_PRIMITIVE => {
                let token = self.auth.get(&self.auth_service, Some(scope)).await?;
                tracing::debug!("Injected '{}'-scoped token for '{}'", scope, tool_id);
                Some(token)
            }
            Some(scope) => {
                return Err(KernelError::AuthOnNonHttpTerminal {
                    tool_id: tool_id.to_string(),
                    scope: scope.to_string(),
                })
            }
            None => None,
        };

        // Step 10: dispatch
        self.transition(&cancel, Phase::Executing)?;
        match terminal.tool_id.as_str() {
            SUBPROCESS_PRIMITIVE => {
                self.dispatch_subprocess(config, env, options, flags, &cancel)
                    .await
            }
            HTTP_PRIMITIVE => {
                self.dispatch_http(config, auth_token, options, flags, &cancel)
                    .await
            }
            other => Err(KernelError::MalformedChain {
                tool_id: tool_id.to_string(),
                reason: format!("unknown terminal primitive '{}'", other),
            }),
        }
    }

    async fn dispatch_subprocess(
        &self,
        config: serde_json::Map<String, Value>,
        env: EnvMap,
        options: &mut ExecuteOptions,
        flags: &mut serde_json::Map<String, Value>,
        cancel: &CancelHandle,
    ) -> Result<Value, KernelError> {
        let command = config
            .get("command")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                KernelError::Config("subprocess config resolved without a command".to_string())
            })?
            .to_string();
        let args = config
            .get("args")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(value_to_string).collect())
            .unwrap_or_default();
        let cwd = config.get("cwd").and_then(Value::as_str).map(PathBuf::from);
        let stdin_bytes = config
            .get("stdin")
            .and_then(Value::as_str)
            .map(|s| s.as_bytes().to_vec());
        let timeout = config_timeout(&config, subprocess::DEFAULT_TIMEOUT_MS);

        let capture = match options.sink.take() {
            Some(sink) => Capture::Streamed(sink),
            None => Capture::Inline {
                limit: subprocess::MAX_CAPTURE_BYTES,
            },
        };

        let output = subprocess::run(
            SubprocessRequest {
                command,
                args,
                env,
                cwd,
                timeout,
                stdin_bytes,
                capture,
            },
            cancel,
        )
        .await?;

        if output.truncated {
            flags.insert("truncated".to_string(), Value::Bool(true));
        }
        if output.timed_out {
            flags.insert(
                "exit_code".to_string(),
                Value::Number(output.exit_code.into()),
            );
            return Err(KernelError::Timeout);
        }

        Ok(serde_json::json!({
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }))
    }

    async fn dispatch_http(
        &self,
        config: serde_json::Map<String, Value>,
        auth_token: Option<auth::SecretString>,
        options: &mut ExecuteOptions,
        flags: &mut serde_json::Map<String, Value>,
        cancel: &CancelHandle,
    ) -> Result<Value, KernelError> {
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                KernelError::Config("http config resolved without a url".to_string())
            })?
            .to_string();
        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_string();

        let mut request = HttpRequest::new(method, url);
        request.timeout = config_timeout(&config, crate::primitives::http::DEFAULT_TIMEOUT_MS);
        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                request.headers.insert(name.clone(), value_to_string(value));
            }
        }
        if let Some(query) = config.get("query").and_then(Value::as_object) {
            for (name, value) in query {
                request.query.push((name.clone(), value_to_string(value)));
            }
        }
        request.body = config.get("body").cloned();
        request.retry = retry_policy_from(&config);

        if let Some(token) = &auth_token {
            request.headers.insert(
                "Authorization".to_string(),
                format!("Bearer {}", token.unsecure()),
            );
        }

        let response = self
            .http
            .request(&request, options.sink.as_deref_mut(), cancel)
            .await?;

        flags.insert(
            "attempts".to_string(),
            Value::Number(response.attempts.into()),
        );
        if response.truncated {
            flags.insert("truncated".to_string(), Value::Bool(true));
        }

        Ok(serde_json::json!({
            "status": response.status,
            "headers": response.headers,
            "body": response.body,
            "streamed": response.streamed,
        }))
    }

    fn transition(&self, cancel: &CancelHandle, phase: Phase) -> Result<(), KernelError> {
        if cancel.is_cancelled() {
            tracing::debug!("Cancelled before {} phase", phase);
            return Err(KernelError::Cancelled);
        }
        tracing::trace!("Entering {} phase", phase);
        Ok(())
    }

    /// Enumerate tools for the search adapter
    pub fn search(&self, filter: &ListFilter) -> Vec<ToolInfo> {
        self.store.list(filter)
    }

    /// Load a manifest for preview
    ///
    /// The returned record is the manifest as declared; resolved
    /// environments and credentials are never part of it.
    pub fn load(&self, tool_id: &str) -> Result<ToolManifest, KernelError> {
        let located = self.store.locate(tool_id)?;
        let manifest = self.extractor.extract(&located.path)?;
        Ok((*manifest).clone())
    }

    /// Static help text per topic
    pub fn help(&self, topic: &str) -> String {
        match topic {
            "execute" => "execute(tool_id, params, options) resolves the tool's executor \
                chain, verifies integrity and lockfiles, resolves the environment, and \
                dispatches to the subprocess or HTTP primitive."
                .to_string(),
            "lockfiles" => "Lockfiles freeze a tool's resolved chain. Modes: off (ignore), \
                warn (flag drift in result metadata), strict (refuse to execute on drift \
                or when no lockfile exists)."
                .to_string(),
            "auth" => "Tools declaring required_scope execute with a token of that scope \
                injected at dispatch. Tokens live in the OS keychain and are never \
                returned to callers. Sign in through the host application."
                .to_string(),
            "search" => "search(filter) lists tools by id substring and category.".to_string(),
            _ => "Topics: execute, search, lockfiles, auth.".to_string(),
        }
    }

    /// Freeze the current chain of a tool and save the lockfile
    pub fn freeze_lockfile(&self, tool_id: &str, scope: Scope) -> Result<Lockfile, KernelError> {
        let chain = chain::resolve_chain(&self.store, &self.extractor, tool_id)?;
        let lockfile = self.lockfiles.freeze(&chain)?;
        self.lockfiles.save(&lockfile, scope)?;
        Ok(lockfile)
    }

    /// Forget cached manifest locations
    pub fn reload(&self) {
        self.store.reload();
    }
}

/// Merge configs root-to-terminal: the accumulator keeps the first value
/// seen for a key, so parents override the defaults of everything below
fn merge_chain_configs(chain: &ResolvedChain) -> serde_json::Map<String, Value> {
    let mut merged = serde_json::Map::new();
    for element in chain.elements() {
        for (key, value) in &element.manifest.config {
            merged.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    merged
}

fn config_timeout(config: &serde_json::Map<String, Value>, default_ms: u64) -> Duration {
    let requested = config
        .get("timeout_ms")
        .and_then(Value::as_u64)
        .unwrap_or(default_ms);
    Duration::from_millis(requested.min(MAX_TIMEOUT_MS))
}

fn retry_policy_from(config: &serde_json::Map<String, Value>) -> RetryPolicy {
    let mut policy = RetryPolicy::default();
    let Some(retry) = config.get("retry").and_then(Value::as_object) else {
        return policy;
    };
    if let Some(max_attempts) = retry.get("max_attempts").and_then(Value::as_u64) {
        policy.max_attempts = (max_attempts.max(1)) as u32;
    }
    if let Some(initial) = retry.get("initial_delay_ms").and_then(Value::as_u64) {
        policy.initial_delay = Duration::from_millis(initial);
    }
    if let Some(max_delay) = retry.get("max_delay_ms").and_then(Value::as_u64) {
        policy.max_delay = Duration::from_millis(max_delay);
    }
    if let Some(multiplier) = retry.get("multiplier").and_then(Value::as_f64) {
        policy.multiplier = multiplier;
    }
    if let Some(jitter) = retry.get("jitter").and_then(Value::as_bool) {
        policy.jitter = jitter;
    }
    policy
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_config_timeout_defaults_and_clamps() {
        assert_eq!(
            config_timeout(&map(json!({})), 30_000),
            Duration::from_millis(30_000)
        );
        assert_eq!(
            config_timeout(&map(json!({"timeout_ms": 1000})), 30_000),
            Duration::from_millis(1000)
        );
        assert_eq!(
            config_timeout(&map(json!({"timeout_ms": 10_000_000})), 30_000),
            Duration::from_millis(MAX_TIMEOUT_MS)
        );
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = map(json!({
            "retry": {
                "max_attempts": 5,
                "initial_delay_ms": 100,
                "multiplier": 3.0,
                "jitter": false
            }
        }));
        let policy = retry_policy_from(&config);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(100));
        assert_eq!(policy.multiplier, 3.0);
        assert!(!policy.jitter);
    }

    #[test]
    fn test_retry_policy_missing_is_default() {
        let policy = retry_policy_from(&map(json!({})));
        assert_eq!(policy.max_attempts, RetryPolicy::default().max_attempts);
    }

    #[test]
    fn test_value_to_string_forms() {
        assert_eq!(value_to_string(&json!("s")), "s");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&json!(true)), "true");
    }
}
