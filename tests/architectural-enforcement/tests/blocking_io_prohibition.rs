//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Async functions in duet-core and the duet CLI MUST NOT use
//! blocking I/O. Use `tokio::fs`, `tokio::net` and async `reqwest`.
//! **Exceptions**: non-async functions (config loading runs on a blocking
//! thread), test code

use architectural_enforcement::{code_part, is_in_async_fn, is_test_code, scan, Violation};

/// Blocking calls and what they are
const FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    ("std::io::stdin()", "Blocking stdin"),
    ("std::thread::sleep", "Blocking sleep"),
];

fn find_blocking_io_violations() -> Vec<Violation> {
    scan(|lines, idx| {
        if is_test_code(lines, idx) || !is_in_async_fn(lines, idx) {
            return None;
        }
        let code = code_part(lines[idx]);
        FORBIDDEN
            .iter()
            .find(|(pattern, _)| code.contains(pattern))
            .map(|(_, kind)| *kind)
    })
}

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read_to_string().await");
        eprintln!("  - tokio::task::spawn_blocking() for sync loaders");
        eprintln!("  - reqwest::Client (async)");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}
