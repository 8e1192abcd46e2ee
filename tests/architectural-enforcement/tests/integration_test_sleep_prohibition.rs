//! Integration Test: Sleep Prohibition
//!
//! Readiness polling, stub pacing and shutdown escalation all wait on I/O,
//! timers or signals. A bare sleep can't be interrupted by a stop request.
//!
//! **Policy**: Production code MUST NOT call sleep methods.
//! **Exceptions**: exponential backoff (retry logic only)
//! **Required**: `tokio::time::interval`, `tokio::time::timeout`, `Notify`

use std::fs;
use std::path::{Path, PathBuf};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE sleep uses:");
        eprintln!("  - Exponential backoff in retry logic");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops (health checks, process exit)");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for events (use async I/O!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn workspace_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join(relative)
}

/// Find all sleep() calls in production code
fn find_sleep_violations() -> Vec<String> {
    let mut violations = Vec::new();

    // The core, including the stub server under src/bin
    check_directory(
        &workspace_path("engine/core/src"),
        &mut violations,
        &SleepPolicy {
            allow_backoff: true,
            allow_tests: false,
        },
    );

    check_directory(
        &workspace_path("engine/cli/src"),
        &mut violations,
        &SleepPolicy {
            allow_backoff: false,
            allow_tests: false,
        },
    );

    violations
}

struct SleepPolicy {
    allow_backoff: bool,
    allow_tests: bool,
}

fn check_directory(path: &Path, violations: &mut Vec<String>, policy: &SleepPolicy) {
    assert!(path.exists(), "checked directory missing: {}", path.display());

    for entry in walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("rs") {
            check_file(entry.path(), violations, policy);
        }
    }
}

fn check_file(path: &Path, violations: &mut Vec<String>, policy: &SleepPolicy) {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let lines: Vec<&str> = content.lines().collect();

    for (idx, line) in lines.iter().enumerate() {
        let line_number = idx + 1;

        // Skip comments
        let code_part = line.split("//").next().unwrap_or(line);

        if code_part.contains("::sleep(") || code_part.contains(".sleep(") {
            if policy.allow_tests && is_in_test_function(&lines, idx) {
                continue;
            }

            if policy.allow_backoff && is_backoff_context(&lines, idx) {
                continue;
            }

            violations.push(format!(
                "{}:{} - {}",
                path.display(),
                line_number,
                line.trim()
            ));
        }
    }
}

/// Check if line is inside a test function
fn is_in_test_function(lines: &[&str], current_idx: usize) -> bool {
    for i in (0..current_idx).rev() {
        let line = lines[i].trim();

        if line.contains("fn ") && !line.contains("test") {
            return false; // Found a non-test function first
        }

        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }

        if line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

/// Check if sleep is used for exponential backoff (acceptable for retry logic)
fn is_backoff_context(lines: &[&str], current_idx: usize) -> bool {
    let context_range = current_idx.saturating_sub(15)..std::cmp::min(current_idx + 5, lines.len());

    let mut has_backoff_calc = false;
    let mut has_retry_context = false;

    for i in context_range {
        let line = lines[i].to_lowercase();

        // Exponential backoff calculation (2^n pattern or bit shift)
        if line.contains("<<") || line.contains("pow") || line.contains("* 2") {
            has_backoff_calc = true;
        }

        if line.contains("retry")
            || line.contains("reconnect")
            || line.contains("backoff")
            || line.contains("attempt")
        {
            has_retry_context = true;
        }
    }

    has_backoff_calc && has_retry_context
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_outside_test_is_not_exempt() {
        let test_code = vec![
            "pub async fn wait_for_health() {",
            "    tokio::time::sleep(Duration::from_millis(250)).await;",
            "}",
        ];

        assert!(
            !is_in_test_function(&test_code, 1),
            "Should detect this is not a test"
        );
        assert!(!is_backoff_context(&test_code, 1));
    }

    #[test]
    fn test_backoff_detection() {
        let test_code = vec![
            "fn reconnect() {",
            "    let delay = base_delay * (1 << attempt);",
            "    debug!(attempt, \"Retrying\");",
            "    tokio::time::sleep(Duration::from_millis(delay)).await;",
            "}",
        ];

        assert!(
            is_backoff_context(&test_code, 3),
            "Should detect exponential backoff pattern"
        );
    }

    #[test]
    fn test_test_function_detection() {
        let test_code = vec![
            "#[tokio::test]",
            "async fn test_timeout() {",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];

        assert!(is_in_test_function(&test_code, 2));
    }
}
