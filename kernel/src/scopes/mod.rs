//! Filesystem scope roots
//!
//! Manifests and lockfiles live under a `.ai/` state directory in one of
//! three layered roots: project, user, bundled. Project always wins; the
//! bundled root ships with the kernel binary and loses to everything.
//!
//! The user root defaults to the home directory and can be redirected with
//! the `USER_SPACE` environment variable (read once at discovery).

use sdk::errors::KernelError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the state directory under each scope root
pub const STATE_DIR: &str = ".ai";

/// Precedence level a manifest or lockfile is loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Project,
    User,
    Bundled,
}

impl Scope {
    /// All scopes, highest precedence first
    pub const PRECEDENCE: [Scope; 3] = [Scope::Project, Scope::User, Scope::Bundled];

    /// Scopes lockfiles may be written to (bundled is read-only)
    pub const WRITABLE: [Scope; 2] = [Scope::Project, Scope::User];
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Project => "project",
            Scope::User => "user",
            Scope::Bundled => "bundled",
        };
        write!(f, "{}", name)
    }
}

/// The three scope roots a kernel instance works against
#[derive(Debug, Clone)]
pub struct ScopeRoots {
    project: PathBuf,
    user: PathBuf,
    bundled: PathBuf,
}

impl ScopeRoots {
    /// Build roots from explicit directories (used by tests and embedders
    /// that manage their own layout)
    pub fn new(project: PathBuf, user: PathBuf, bundled: PathBuf) -> Self {
        Self {
            project,
            user,
            bundled,
        }
    }

    /// Build roots for a project directory, discovering the user root from
    /// `USER_SPACE` or the home directory
    pub fn discover(project: PathBuf, bundled: PathBuf) -> Result<Self, KernelError> {
        let user = match std::env::var_os("USER_SPACE") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or_else(|| KernelError::Config("cannot determine home directory".into()))?,
        };
        Ok(Self::new(project, user, bundled))
    }

    pub fn root(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Project => &self.project,
            Scope::User => &self.user,
            Scope::Bundled => &self.bundled,
        }
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn user(&self) -> &Path {
        &self.user
    }

    /// `<root>/.ai/tools` for the given scope
    pub fn tools_dir(&self, scope: Scope) -> PathBuf {
        self.root(scope).join(STATE_DIR).join("tools")
    }

    /// `<root>/.ai/lockfiles` for the given scope
    pub fn lockfiles_dir(&self, scope: Scope) -> PathBuf {
        self.root(scope).join(STATE_DIR).join("lockfiles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> ScopeRoots {
        ScopeRoots::new(
            PathBuf::from("/p"),
            PathBuf::from("/u"),
            PathBuf::from("/b"),
        )
    }

    #[test]
    fn test_precedence_order() {
        assert_eq!(
            Scope::PRECEDENCE,
            [Scope::Project, Scope::User, Scope::Bundled]
        );
    }

    #[test]
    fn test_tools_dir_layout() {
        let roots = roots();
        assert_eq!(
            roots.tools_dir(Scope::Project),
            PathBuf::from("/p/.ai/tools")
        );
        assert_eq!(roots.tools_dir(Scope::User), PathBuf::from("/u/.ai/tools"));
        assert_eq!(
            roots.tools_dir(Scope::Bundled),
            PathBuf::from("/b/.ai/tools")
        );
    }

    #[test]
    fn test_lockfiles_dir_layout() {
        let roots = roots();
        assert_eq!(
            roots.lockfiles_dir(Scope::User),
            PathBuf::from("/u/.ai/lockfiles")
        );
    }

    #[test]
    fn test_bundled_not_writable() {
        assert!(!Scope::WRITABLE.contains(&Scope::Bundled));
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Project.to_string(), "project");
        assert_eq!(Scope::Bundled.to_string(), "bundled");
    }
}
