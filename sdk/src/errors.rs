//! Error types and handling
//!
//! This module provides the error taxonomy used throughout the kiwi kernel.
//! All errors implement the `KernelErrorExt` trait which provides
//! user-friendly hints, a stable machine-readable kind, and indicates whether
//! errors are recoverable.
//!
//! # Security
//!
//! All error messages are safe to surface to callers:
//! - No secrets (access tokens, refresh tokens) are ever included
//! - Paths are included only for artefacts the caller already named

use std::path::PathBuf;
use thiserror::Error;

/// Trait for kernel error extensions
///
/// Provides additional context for errors: a user-facing hint, a stable kind
/// string for result metadata, and recoverability information.
pub trait KernelErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to display to end users and does not contain
    /// secrets or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns the stable machine-readable kind of the error
    ///
    /// Callers use this (via `ExecutionResult.metadata.error_kind`) to
    /// distinguish failure classes without parsing the message text.
    fn kind(&self) -> &'static str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around by the caller.
    /// Non-recoverable errors require changing the manifests, credentials,
    /// or lockfiles involved.
    fn is_recoverable(&self) -> bool;
}

/// Main kernel error type
///
/// This enum is the total failure taxonomy of the kernel. Every failure the
/// executor can surface is one of these variants; nothing is raised past the
/// `execute` boundary as a panic or an untyped error.
///
/// # Error Categories
///
/// - **Resolution**: unresolved tools, cycles, chains without a terminal
/// - **Manifests**: malformed or incomplete metadata
/// - **Integrity**: content-hash mismatches (fatal, pre-dispatch)
/// - **Lockfiles**: frozen-chain drift and missing locks in strict mode
/// - **Auth**: missing credentials, missing scopes, invariant violations
/// - **Dispatch**: timeouts, cancellation, primitive failures
#[derive(Debug, Error)]
pub enum KernelError {
    // Chain resolution errors
    #[error("Tool not found: {0}")]
    UnresolvedTool(String),

    #[error("Executor chain cycle detected at '{0}'")]
    CyclicChain(String),

    #[error("No terminal primitive within {max_depth} links starting from '{tool_id}'")]
    NoTerminal { tool_id: String, max_depth: usize },

    #[error("Malformed chain for '{tool_id}': {reason}")]
    MalformedChain { tool_id: String, reason: String },

    // Manifest errors
    #[error("Malformed manifest {path:?}: {field}")]
    MalformedManifest { path: PathBuf, field: String },

    // Integrity errors
    #[error("Integrity mismatch for '{tool_id}' at {path:?}")]
    IntegrityMismatch { tool_id: String, path: PathBuf },

    // Lockfile errors
    #[error("Lockfile mismatch for '{tool_id}@{version}': {detail}")]
    LockfileMismatch {
        tool_id: String,
        version: String,
        detail: String,
    },

    #[error("No lockfile recorded for '{tool_id}@{version}'")]
    LockfileMissing { tool_id: String, version: String },

    // Caller parameter errors
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    // Auth errors
    #[error("No authentication token for {service}. Please sign in.")]
    AuthenticationRequired { service: String },

    #[error("Token for {service} does not grant scope '{scope}'")]
    ScopeUnavailable { service: String, scope: String },

    #[error("'{tool_id}' requires scope '{scope}' but terminates at a non-HTTP primitive")]
    AuthOnNonHttpTerminal { tool_id: String, scope: String },

    // Dispatch errors
    #[error("timeout")]
    Timeout,

    #[error("cancelled")]
    Cancelled,

    #[error("Primitive failure: {0}")]
    PrimitiveFailure(String),

    // Keyring errors
    #[error("Keyring error: {0}")]
    Keyring(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KernelErrorExt for KernelError {
    fn user_hint(&self) -> &str {
        match self {
            // Chain resolution errors
            Self::UnresolvedTool(_) => "The requested tool is not available in any scope",
            Self::CyclicChain(_) => "The tool's executor chain loops back on itself",
            Self::NoTerminal { .. } => "The executor chain never reaches a primitive",
            Self::MalformedChain { .. } => "The executor chain is not a valid shape",

            // Manifest errors
            Self::MalformedManifest { .. } => "The tool's manifest file could not be read",

            // Integrity errors
            Self::IntegrityMismatch { .. } => {
                "Content verification failed. The manifest may have been modified"
            }

            // Lockfile errors
            Self::LockfileMismatch { .. } => {
                "The resolved chain differs from the frozen lockfile. Re-freeze to accept"
            }
            Self::LockfileMissing { .. } => "Freeze a lockfile before running in strict mode",

            // Caller parameter errors
            Self::InvalidParams(_) => "Check the parameters against the tool's schema",

            // Auth errors
            Self::AuthenticationRequired { .. } => "Sign in to store credentials for this service",
            Self::ScopeUnavailable { .. } => "Sign in again with the required scope",
            Self::AuthOnNonHttpTerminal { .. } => {
                "Only HTTP-terminated tools may require an auth scope"
            }

            // Dispatch errors
            Self::Timeout => "The tool exceeded its time limit. Try a longer timeout",
            Self::Cancelled => "The call was cancelled before completion",
            Self::PrimitiveFailure(_) => "Tool execution failed",

            // Keyring errors
            Self::Keyring(_) => "Failed to access secure storage. Check system keychain",

            // Configuration errors
            Self::Config(_) => "Check the kernel configuration",

            // Generic IO error
            Self::Io(_) => "File system operation failed",
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::UnresolvedTool(_) => "UnresolvedTool",
            Self::CyclicChain(_) => "CyclicChain",
            Self::NoTerminal { .. } => "NoTerminal",
            Self::MalformedChain { .. } => "MalformedChain",
            Self::MalformedManifest { .. } => "MalformedManifest",
            Self::IntegrityMismatch { .. } => "IntegrityMismatch",
            Self::LockfileMismatch { .. } => "LockfileMismatch",
            Self::LockfileMissing { .. } => "LockfileMissing",
            Self::InvalidParams(_) => "InvalidParams",
            Self::AuthenticationRequired { .. } => "AuthenticationRequired",
            Self::ScopeUnavailable { .. } => "ScopeUnavailable",
            Self::AuthOnNonHttpTerminal { .. } => "AuthOnNonHttpTerminal",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::PrimitiveFailure(_) => "PrimitiveFailure",
            Self::Keyring(_) => "Keyring",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Hard failures: nothing the caller can do without changing
            // the manifests, lockfiles, or credentials involved
            Self::CyclicChain(_)
            | Self::NoTerminal { .. }
            | Self::MalformedChain { .. }
            | Self::MalformedManifest { .. }
            | Self::IntegrityMismatch { .. }
            | Self::AuthOnNonHttpTerminal { .. } => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
