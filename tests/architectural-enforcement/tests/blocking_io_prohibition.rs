//! Integration Test: Blocking I/O Prohibition
//!
//! Async code in the generation core and the CLI must not block the
//! runtime: a stalled reader thread means a stop request that never lands.
//!
//! **Policy**: Production code MUST NOT use blocking I/O inside async functions.
//! **Required**: Use `tokio::fs`, `tokio::net`, `tokio::process`, not `std::fs`, `std::net`, `std::process`

use std::fs;
use std::path::{Path, PathBuf};

/// Source trees held to the policy, relative to the workspace root
const CHECKED_DIRS: &[&str] = &["engine/core/src", "engine/cli/src"];

/// `std::net` items that are plain data, not sockets
const ADDRESS_TYPES: &[&str] = &["SocketAddr", "IpAddr", "Ipv4Addr", "Ipv6Addr"];

/// Test that production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_production_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - std::process::Command");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("  - std::io::stdin() / std::io::stdout() in async functions");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::read_dir().await");
        eprintln!("  - tokio::net::TcpListener::bind().await");
        eprintln!("  - tokio::process::Command::spawn()");
        eprintln!("  - tokio::io::stdin() / tokio::io::stdout()");
        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Non-async functions (config loading before generation starts)");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn workspace_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

/// Find all blocking I/O calls in production code
fn find_blocking_io_violations() -> Vec<String> {
    let mut violations = Vec::new();
    for dir in CHECKED_DIRS {
        check_directory(&workspace_path(dir), &mut violations);
    }
    violations
}

fn check_directory(path: &Path, violations: &mut Vec<String>) {
    assert!(path.exists(), "checked directory missing: {}", path.display());

    for entry in walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);
        if code_part.trim().is_empty() {
            continue;
        }

        if is_in_test_function(&lines, idx) || is_in_non_async_function(&lines, idx) {
            continue;
        }

        let mut report = |kind: &str| {
            violations.push(format!(
                "{}:{} - {}: {}",
                path.display(),
                line_number,
                kind,
                line.trim()
            ));
        };

        if code_part.contains("std::fs::") || code_part.contains("use std::fs") {
            report("Blocking file I/O");
        }

        if (code_part.contains("std::net::") || code_part.contains("use std::net"))
            && !is_address_only(code_part)
        {
            report("Blocking network I/O");
        }

        if code_part.contains("std::process::Command") {
            report("Blocking process I/O");
        }

        if code_part.contains("reqwest::blocking") {
            report("Blocking HTTP client");
        }

        if (code_part.contains("std::io::stdin()") || code_part.contains("std::io::stdout()"))
            && is_in_async_function(&lines, idx)
        {
            report("Blocking stdin/stdout in async");
        }
    }
}

/// Whether a `std::net` mention only names address types
fn is_address_only(code: &str) -> bool {
    let Some(rest) = code.split("std::net::").nth(1) else {
        return false;
    };
    let items: Vec<&str> = rest
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|s| !s.is_empty())
        .collect();
    !items.is_empty() && items.iter().all(|item| ADDRESS_TYPES.contains(item))
}

/// `Some(is_async)` if `line` opens a function, after visibility and
/// qualifiers
fn function_signature(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let is_async = rest.starts_with("async ");
    for qualifier in ["const ", "async ", "unsafe "] {
        rest = rest.strip_prefix(qualifier).unwrap_or(rest);
    }
    rest.starts_with("fn ").then_some(is_async)
}

fn is_boundary(line: &str) -> bool {
    line.starts_with("mod ") || line.starts_with("pub mod ") || (line.starts_with("impl") && line.contains('{'))
}

/// Check if line is inside a test function
fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    // Scan backwards to find the enclosing function
    let mut found_fn_idx = None;
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if function_signature(line).is_some() {
            found_fn_idx = Some(i);
            break;
        }

        if is_boundary(line) {
            return false;
        }
    }

    // If we found a function, check if it has a test marker
    if let Some(fn_idx) = found_fn_idx {
        for i in (0..fn_idx).rev() {
            let line = lines[i].trim();

            if line.starts_with("#[test]")
                || line.starts_with("#[tokio::test")
                || line.starts_with("#[cfg(test)]")
            {
                return true;
            }

            // Attributes and doc comments sit between the marker and the fn
            if !(line.starts_with("#[") || line.starts_with("///")) {
                break;
            }
        }
    }

    false
}

/// Check if line is inside an async function
fn is_in_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if let Some(is_async) = function_signature(line) {
            return is_async;
        }

        if is_boundary(line) {
            return false;
        }
    }
    false
}

/// Check if line is inside a non-async function (acceptable for blocking I/O)
fn is_in_non_async_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if let Some(is_async) = function_signature(line) {
            return !is_async;
        }

        if is_boundary(line) {
            return false;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_io_detection() {
        let test_code = vec![
            "async fn bad_function() {",
            "    let contents = std::fs::read_to_string(\"file.txt\")?;",
            "}",
        ];

        assert!(
            is_in_async_function(&test_code, 1),
            "Should detect async function"
        );
        assert!(
            !is_in_non_async_function(&test_code, 1),
            "Should not be in non-async function"
        );
    }

    #[test]
    fn test_pub_functions_are_recognised() {
        let test_code = vec![
            "pub fn load_config() -> Result<Config> {",
            "    let text = std::fs::read_to_string(path)?;",
            "}",
            "pub(crate) async fn probe() {",
            "    let text = std::fs::read_to_string(path)?;",
            "}",
        ];

        assert!(is_in_non_async_function(&test_code, 1));
        assert!(is_in_async_function(&test_code, 4));
        assert_eq!(function_signature("pub async fn x()"), Some(true));
        assert_eq!(function_signature("let f = 1;"), None);
    }

    #[test]
    fn test_test_function_detection() {
        let test_code = vec![
            "#[tokio::test]",
            "async fn test_something() {",
            "    let contents = std::fs::read_to_string(\"test.txt\")?;",
            "}",
        ];

        assert!(
            is_in_test_function(&test_code, 2),
            "Should detect test function"
        );
    }

    #[test]
    fn test_address_types_are_allowed() {
        assert!(is_address_only("use std::net::SocketAddr;"));
        assert!(is_address_only("use std::net::{IpAddr, SocketAddr};"));
        assert!(!is_address_only("use std::net::{SocketAddr, TcpStream};"));
        assert!(!is_address_only("let s = std::net::TcpStream::connect(addr);"));
    }
}
