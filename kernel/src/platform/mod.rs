//! Platform-specific utilities
//!
//! This module parameterises the env resolver over operating-system
//! differences: executable suffixes, virtualenv and node_modules layouts,
//! `PATH` scanning, and version-manager install trees. Everything here is a
//! pure path computation or a read-only existence probe; nothing writes.
//!
//! # Path Handling
//!
//! Rust's `std::path::Path` and `PathBuf` automatically handle
//! platform-specific path separators (/ on Unix, \ on Windows). The helpers
//! below only add the pieces `PathBuf` cannot know about, such as where a
//! virtualenv keeps its interpreter on each OS.

use std::path::{Path, PathBuf};

/// Platform-specific executable suffix
///
/// Empty on Unix systems, `.exe` on Windows.
#[cfg(unix)]
pub const EXE_SUFFIX: &str = "";

#[cfg(windows)]
pub const EXE_SUFFIX: &str = ".exe";

/// Construct a platform-specific executable filename
///
/// # Examples
///
/// ```
/// use kiwi_kernel::platform::binary_filename;
///
/// let name = binary_filename("python3");
///
/// #[cfg(unix)]
/// assert_eq!(name, "python3");
///
/// #[cfg(windows)]
/// assert_eq!(name, "python3.exe");
/// ```
pub fn binary_filename(name: &str) -> String {
    if name.ends_with(EXE_SUFFIX) || EXE_SUFFIX.is_empty() {
        name.to_string()
    } else {
        format!("{}{}", name, EXE_SUFFIX)
    }
}

/// Interpreter path inside a virtualenv directory
///
/// Unix virtualenvs keep the interpreter at `<venv>/bin/python`; Windows
/// virtualenvs at `<venv>/Scripts/python.exe`.
pub fn venv_python(venv: &Path) -> PathBuf {
    #[cfg(unix)]
    {
        venv.join("bin").join("python")
    }

    #[cfg(windows)]
    {
        venv.join("Scripts").join("python.exe")
    }
}

/// Node binary path inside a `node_modules` tree
pub fn node_modules_bin(root: &Path, binary: &str) -> PathBuf {
    root.join("node_modules")
        .join(".bin")
        .join(binary_filename(binary))
}

/// Locate a binary by scanning a `PATH`-style value
///
/// This is a shell-free `which`: each entry of `path_value` is probed for
/// `<entry>/<binary><EXE_SUFFIX>` and the first existing file wins. The
/// caller supplies the `PATH` value so resolution stays a pure function of
/// its inputs.
pub fn which(binary: &str, path_value: &str) -> Option<PathBuf> {
    let filename = binary_filename(binary);
    std::env::split_paths(path_value)
        .map(|dir| dir.join(&filename))
        .find(|candidate| candidate.is_file())
}

/// Default rbenv root under the given home directory
pub fn rbenv_default_root(home: &Path) -> PathBuf {
    home.join(".rbenv")
}

/// Default nvm root under the given home directory
pub fn nvm_default_root(home: &Path) -> PathBuf {
    home.join(".nvm")
}

/// Default asdf data directory under the given home directory
pub fn asdf_default_root(home: &Path) -> PathBuf {
    home.join(".asdf")
}

/// Binary path inside an rbenv install tree: `<root>/versions/<v>/bin/<bin>`
pub fn rbenv_version_bin(root: &Path, version: &str, binary: &str) -> PathBuf {
    root.join("versions")
        .join(version)
        .join("bin")
        .join(binary_filename(binary))
}

/// Binary path inside an nvm install tree:
/// `<root>/versions/node/<v>/bin/<bin>`
pub fn nvm_version_bin(root: &Path, version: &str, binary: &str) -> PathBuf {
    root.join("versions")
        .join("node")
        .join(version)
        .join("bin")
        .join(binary_filename(binary))
}

/// Binary path inside an asdf install tree:
/// `<root>/installs/<tool>/<v>/bin/<bin>`
pub fn asdf_version_bin(root: &Path, tool: &str, version: &str, binary: &str) -> PathBuf {
    root.join("installs")
        .join(tool)
        .join(version)
        .join("bin")
        .join(binary_filename(binary))
}

/// Get the platform name as a string
///
/// Returns one of: "linux", "macos", "windows", "unknown"
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    return "linux";

    #[cfg(target_os = "macos")]
    return "macos";

    #[cfg(target_os = "windows")]
    return "windows";

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "unknown";
}
