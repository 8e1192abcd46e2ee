//! Inference binary resolution
//!
//! A configured binary is one of:
//! - `"bundled"`: shipped next to the running executable
//! - an explicit path (absolute, or relative containing a separator)
//! - a bare name looked up on `PATH`

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::GenerationError;

/// Configured value selecting the bundled binary
pub const BUNDLED: &str = "bundled";

/// Default server binary name
pub const LLAMA_SERVER: &str = "llama-server";

/// Default per-generation CLI binary name
pub const LLAMA_CLI: &str = "llama-cli";

/// Resolve a configured binary to an existing file
///
/// `bundled_name` is the file searched for when `configured` is
/// `"bundled"` (or empty).
///
/// # Errors
///
/// Returns [`GenerationError::Configuration`] when nothing is found.
pub fn resolve_binary(configured: &str, bundled_name: &str) -> Result<PathBuf, GenerationError> {
    let configured = configured.trim();
    if configured.is_empty() || configured == BUNDLED {
        return bundled_candidates(bundled_name)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                GenerationError::configuration(format!(
                    "bundled binary '{bundled_name}' not found next to the executable"
                ))
            });
    }

    let path = Path::new(configured);
    if path.is_absolute() || path.components().count() > 1 {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(GenerationError::configuration(format!(
                "binary not found at {}",
                path.display()
            )))
        };
    }

    search_path(configured, std::env::var_os("PATH")).map_err(|e| {
        GenerationError::configuration(format!("binary '{configured}' not found on PATH: {e}"))
    })
}

/// Places a bundled binary may live, in search order
#[must_use]
pub fn bundled_candidates(name: &str) -> Vec<PathBuf> {
    let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    else {
        return Vec::new();
    };

    vec![
        exe_dir.join("llama").join(name),
        exe_dir.join("..").join("Frameworks").join("llama").join(name),
        exe_dir.join(name),
    ]
}

/// First executable called `name` in the `path_var` directories
///
/// Bare names never consult the working directory, so an unknown one is
/// harmless.
fn search_path(name: &str, path_var: Option<OsString>) -> Result<PathBuf, which::Error> {
    let cwd = std::env::current_dir().unwrap_or_default();
    which::which_in(name, path_var, cwd)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("llama-server");
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();

        assert_eq!(
            resolve_binary(binary.to_str().unwrap(), LLAMA_SERVER).unwrap(),
            binary
        );

        let missing = dir.path().join("nope");
        let err = resolve_binary(missing.to_str().unwrap(), LLAMA_SERVER).unwrap_err();
        assert!(matches!(err, GenerationError::Configuration(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_bare_name_is_found_on_path() {
        assert!(resolve_binary("sh", LLAMA_SERVER).is_ok());
        assert!(resolve_binary("definitely-not-a-real-binary-xyz", LLAMA_SERVER).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_path_search_skips_non_executables() {
        use std::os::unix::fs::PermissionsExt;

        let plain = tempfile::tempdir().unwrap();
        let runnable = tempfile::tempdir().unwrap();
        std::fs::write(plain.path().join("llama-server"), b"not a program").unwrap();
        let binary = runnable.path().join("llama-server");
        std::fs::write(&binary, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path_var = std::env::join_paths([plain.path(), runnable.path()]).unwrap();
        assert_eq!(search_path("llama-server", Some(path_var)).unwrap(), binary);

        let only_plain = std::env::join_paths([plain.path()]).unwrap();
        assert!(search_path("llama-server", Some(only_plain)).is_err());
    }

    #[test]
    fn test_bundled_candidates_are_next_to_executable() {
        let candidates = bundled_candidates("llama-cli");
        assert_eq!(candidates.len(), 3);
        assert!(candidates.iter().all(|p| p.ends_with("llama-cli")));
    }
}
