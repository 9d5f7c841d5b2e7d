//! Kiwi Execution Kernel
//!
//! A trusted supervisor for symbolic tool invocations: resolves a tool
//! through its chain of metadata-declared delegates, validates integrity
//! and lockfiles, resolves the execution environment, injects credentials
//! the caller must never see, and dispatches to a subprocess or HTTP
//! terminal primitive.
//!
//! The kernel is a library; RPC transport, CLI, and UI are external
//! collaborators built on [`executor::Executor`].

/// Artefact store: layered manifest lookup
pub mod store;

/// Metadata extraction from manifest files
pub mod extract;

/// Environment resolution and templating
pub mod env_resolver;

/// Content-hash integrity verification
pub mod integrity;

/// Lockfile store: frozen chain shapes
pub mod lockfile;

/// Credential storage over the OS keychain
pub mod auth;

/// Orchestration: chain resolution, the execute state machine
pub mod executor;

/// Terminal execution primitives
pub mod primitives;

/// Filesystem scope roots
pub mod scopes;

/// Platform-specific utilities module
pub mod platform;

pub use executor::{CancelHandle, ExecuteOptions, Executor};
pub use scopes::{Scope, ScopeRoots};
