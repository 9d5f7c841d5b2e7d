//! Kiwi SDK
//!
//! Shared vocabulary of the kiwi execution kernel: manifest types, the error
//! taxonomy, and execution result types. This crate is used by the kernel
//! and by hosts embedding it (RPC adapters, test harnesses).

/// Error types and handling
pub mod errors;

/// Execution result and option types
pub mod types;

/// Manifest types
pub mod manifest;

// Re-export commonly used types
pub use errors::{KernelError, KernelErrorExt};
pub use manifest::{
    ConfigSchema, EnvConfig, ParamSpec, ParamType, ResolverKind, ResolverRule, SearchScope,
    ToolManifest, ToolType, VersionManager,
};
pub use types::{ExecutionResult, ListFilter, LockfileMode, ToolInfo};
