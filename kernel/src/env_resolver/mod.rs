//! Environment resolution
//!
//! Turns a runtime's declared [`EnvConfig`] into a concrete variable map for
//! subprocess spawning and config templating. Resolution is a pure function
//! of its inputs: the declared rules, the scope roots, and a snapshot of the
//! base environment. It probes the filesystem for existence but never
//! creates or writes anything.
//!
//! The order is fixed: base environment, optional `.env` overlay,
//! interpreter resolvers, static assignments (in declaration order, each
//! templated against everything resolved so far). Caller overlays are
//! applied by the executor on top of the returned map.

pub mod template;

use crate::platform;
use crate::scopes::{Scope, ScopeRoots, STATE_DIR};
use sdk::manifest::{EnvConfig, ResolverKind, ResolverRule, SearchScope, VersionManager};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Flat variable map, deterministically ordered
pub type EnvMap = BTreeMap<String, String>;

/// Inputs environment resolution is a function of
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub project_root: PathBuf,
    pub user_root: PathBuf,
    /// Home directory for version-manager default roots
    pub home: PathBuf,
    /// Snapshot of the kernel's process environment
    pub base_env: EnvMap,
}

impl ResolveContext {
    /// Capture the current process environment for the given roots
    pub fn from_process(roots: &ScopeRoots) -> Self {
        let base_env = std::env::vars().collect();
        Self {
            project_root: roots.root(Scope::Project).to_path_buf(),
            user_root: roots.root(Scope::User).to_path_buf(),
            home: dirs::home_dir().unwrap_or_else(|| roots.root(Scope::User).to_path_buf()),
            base_env,
        }
    }
}

/// Resolve an `env_config` to a concrete variable map
pub fn resolve(env_config: &EnvConfig, ctx: &ResolveContext) -> EnvMap {
    let mut env = ctx.base_env.clone();

    if env_config.load_dotenv {
        overlay_dotenv(&mut env, &ctx.project_root.join(".env"));
    }

    for rule in &env_config.interpreter {
        let value = resolve_rule(rule, ctx, &env);
        tracing::debug!("Resolved {} = {}", rule.var, value);
        env.insert(rule.var.clone(), value);
    }

    for (name, raw) in &env_config.env {
        let value = template::expand(&value_as_string(raw), &env);
        env.insert(name.clone(), value);
    }

    env
}

/// Static env values are usually strings; scalars are stringified so a
/// manifest may write `PORT: 8080` without quoting
fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

fn resolve_rule(rule: &ResolverRule, ctx: &ResolveContext, env: &EnvMap) -> String {
    let found = match rule.kind {
        ResolverKind::VenvPython => resolve_venv_python(rule, ctx, env),
        ResolverKind::NodeModules => resolve_node_modules(rule, ctx, env),
        ResolverKind::SystemBinary => resolve_system_binary(rule, env),
        ResolverKind::VersionManager => resolve_version_manager(rule, ctx, env),
    };
    match found {
        Some(path) => path.display().to_string(),
        None => rule.fallback.clone(),
    }
}

fn resolve_venv_python(rule: &ResolverRule, ctx: &ResolveContext, env: &EnvMap) -> Option<PathBuf> {
    for scope in &rule.search {
        let candidate = match scope {
            SearchScope::Project => platform::venv_python(&ctx.project_root.join(".venv")),
            SearchScope::Kiwi => platform::venv_python(
                &ctx.project_root
                    .join(STATE_DIR)
                    .join("scripts")
                    .join(".venv"),
            ),
            SearchScope::User => {
                platform::venv_python(&ctx.user_root.join(STATE_DIR).join(".venv"))
            }
            SearchScope::System => {
                let binary = rule.binary.as_deref().unwrap_or("python3");
                match which_in(binary, env) {
                    Some(path) => path,
                    None => continue,
                }
            }
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn resolve_node_modules(rule: &ResolverRule, ctx: &ResolveContext, env: &EnvMap) -> Option<PathBuf> {
    let binary = rule.binary.as_deref().unwrap_or("node");
    for scope in &rule.search {
        let candidate = match scope {
            SearchScope::Project => platform::node_modules_bin(&ctx.project_root, binary),
            SearchScope::Kiwi => {
                platform::node_modules_bin(&ctx.project_root.join(STATE_DIR).join("scripts"), binary)
            }
            SearchScope::User => {
                platform::node_modules_bin(&ctx.user_root.join(STATE_DIR), binary)
            }
            SearchScope::System => match which_in(binary, env) {
                Some(path) => path,
                None => continue,
            },
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn resolve_system_binary(rule: &ResolverRule, env: &EnvMap) -> Option<PathBuf> {
    let binary = rule.binary.as_deref()?;
    which_in(binary, env)
}

fn resolve_version_manager(
    rule: &ResolverRule,
    ctx: &ResolveContext,
    env: &EnvMap,
) -> Option<PathBuf> {
    let manager = rule.manager?;
    let binary = rule.binary.as_deref().unwrap_or(match manager {
        VersionManager::Rbenv => "ruby",
        VersionManager::Nvm => "node",
        VersionManager::Asdf => return None,
    });

    if let Some(version) = &rule.version {
        let root = manager_root(manager, ctx, env);
        let candidate = match manager {
            VersionManager::Rbenv => platform::rbenv_version_bin(&root, version, binary),
            VersionManager::Nvm => platform::nvm_version_bin(&root, version, binary),
            VersionManager::Asdf => platform::asdf_version_bin(&root, binary, version, binary),
        };
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    which_in(binary, env)
}

fn manager_root(manager: VersionManager, ctx: &ResolveContext, env: &EnvMap) -> PathBuf {
    let (var, default) = match manager {
        VersionManager::Rbenv => ("RBENV_ROOT", platform::rbenv_default_root(&ctx.home)),
        VersionManager::Nvm => ("NVM_DIR", platform::nvm_default_root(&ctx.home)),
        VersionManager::Asdf => ("ASDF_DATA_DIR", platform::asdf_default_root(&ctx.home)),
    };
    env.get(var).map(PathBuf::from).unwrap_or(default)
}

fn which_in(binary: &str, env: &EnvMap) -> Option<PathBuf> {
    let path_value = env.get("PATH").map(String::as_str).unwrap_or("");
    platform::which(binary, path_value)
}

/// Overlay `KEY=VALUE` lines from a `.env`-style file
///
/// Blank lines and `#` comments are skipped; single or double quotes around
/// the value are stripped. A file that does not exist is simply ignored.
fn overlay_dotenv(env: &mut EnvMap, path: &Path) {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        env.insert(key.to_string(), value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn context(project: &TempDir, user: &TempDir) -> ResolveContext {
        ResolveContext {
            project_root: project.path().to_path_buf(),
            user_root: user.path().to_path_buf(),
            home: user.path().to_path_buf(),
            base_env: EnvMap::new(),
        }
    }

    fn env_config(value: serde_json::Value) -> EnvConfig {
        serde_json::from_value(value).unwrap()
    }

    fn plant_venv(root: &Path) -> PathBuf {
        let python = platform::venv_python(&root.join(".venv"));
        fs::create_dir_all(python.parent().unwrap()).unwrap();
        fs::write(&python, "").unwrap();
        python
    }

    #[test]
    fn test_project_venv_wins() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let python = plant_venv(project.path());

        let cfg = env_config(json!({
            "interpreter": [{
                "kind": "venv_python",
                "var": "KIWI_PYTHON",
                "search": ["project", "user", "system"],
                "fallback": "python3"
            }]
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["KIWI_PYTHON"], python.display().to_string());
    }

    #[test]
    fn test_fallback_when_nothing_found() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();

        let cfg = env_config(json!({
            "interpreter": [{
                "kind": "venv_python",
                "var": "KIWI_PYTHON",
                "search": ["project", "user"],
                "fallback": "python3"
            }]
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["KIWI_PYTHON"], "python3");
    }

    #[test]
    fn test_static_env_with_default() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();

        let cfg = env_config(json!({
            "env": {"OUT_DIR": "${OUT_ROOT:-/tmp}/build"}
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["OUT_DIR"], "/tmp/build");
    }

    #[test]
    fn test_static_env_sees_resolver_output() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let python = plant_venv(project.path());

        let cfg = env_config(json!({
            "interpreter": [{
                "kind": "venv_python",
                "var": "KIWI_PYTHON",
                "search": ["project"],
                "fallback": "python3"
            }],
            "env": {"PYTHON_HOME": "${KIWI_PYTHON}"}
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["PYTHON_HOME"], python.display().to_string());
    }

    #[test]
    fn test_declaration_order_applies() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();

        let cfg = env_config(json!({
            "env": {"FIRST": "1", "SECOND": "${FIRST}2", "THIRD": "${SECOND}3"}
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["THIRD"], "123");
    }

    #[test]
    fn test_dotenv_overlay() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(
            project.path().join(".env"),
            "# comment\nTOKEN_NAME=abc\nQUOTED=\"with spaces\"\n",
        )
        .unwrap();

        let cfg = env_config(json!({
            "load_dotenv": true,
            "env": {"DERIVED": "${TOKEN_NAME}!"}
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["TOKEN_NAME"], "abc");
        assert_eq!(env["QUOTED"], "with spaces");
        assert_eq!(env["DERIVED"], "abc!");
    }

    #[test]
    fn test_dotenv_ignored_without_flag() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        fs::write(project.path().join(".env"), "SHOULD_NOT=appear\n").unwrap();

        let env = resolve(&env_config(json!({})), &context(&project, &user));
        assert!(!env.contains_key("SHOULD_NOT"));
    }

    #[test]
    fn test_system_binary_via_path() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let bindir = TempDir::new().unwrap();
        let binary = bindir.path().join(platform::binary_filename("mytool"));
        fs::write(&binary, "").unwrap();

        let mut ctx = context(&project, &user);
        ctx.base_env.insert(
            "PATH".to_string(),
            bindir.path().to_str().unwrap().to_string(),
        );

        let cfg = env_config(json!({
            "interpreter": [{
                "kind": "system_binary",
                "var": "MY_TOOL",
                "binary": "mytool",
                "fallback": "mytool"
            }]
        }));

        let env = resolve(&cfg, &ctx);
        assert_eq!(env["MY_TOOL"], binary.display().to_string());
    }

    #[test]
    fn test_version_manager_pinned() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        let ruby = platform::rbenv_version_bin(
            &platform::rbenv_default_root(user.path()),
            "3.2.0",
            "ruby",
        );
        fs::create_dir_all(ruby.parent().unwrap()).unwrap();
        fs::write(&ruby, "").unwrap();

        let cfg = env_config(json!({
            "interpreter": [{
                "kind": "version_manager",
                "var": "KIWI_RUBY",
                "manager": "rbenv",
                "version": "3.2.0",
                "fallback": "ruby"
            }]
        }));

        let env = resolve(&cfg, &context(&project, &user));
        assert_eq!(env["KIWI_RUBY"], ruby.display().to_string());
    }

    #[test]
    fn test_determinism() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        plant_venv(project.path());

        let cfg = env_config(json!({
            "interpreter": [{
                "kind": "venv_python",
                "var": "KIWI_PYTHON",
                "search": ["project", "kiwi", "user", "system"],
                "fallback": "python3"
            }],
            "env": {"A": "${KIWI_PYTHON}", "B": "${A}"}
        }));

        let ctx = context(&project, &user);
        let first = resolve(&cfg, &ctx);
        let second = resolve(&cfg, &ctx);
        assert_eq!(first, second);
    }
}
