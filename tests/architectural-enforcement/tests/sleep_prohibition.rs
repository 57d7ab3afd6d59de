//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in duet-core and the duet CLI MUST NOT call
//! sleep methods. Lanes wait on channels, never on timers.
//! **Exceptions**: test code

use architectural_enforcement::{code_part, is_test_code, scan, Violation};

fn find_sleep_violations() -> Vec<Violation> {
    scan(|lines, idx| {
        let code = code_part(lines[idx]);
        let sleeps = code.contains("::sleep(") || code.contains(".sleep(");
        (sleeps && !is_test_code(lines, idx)).then_some("sleep call")
    })
}

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");

        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }

        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep as poor man's synchronization");
        eprintln!("  - Sleep to 'wait' for a stream (await the channel instead)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}
