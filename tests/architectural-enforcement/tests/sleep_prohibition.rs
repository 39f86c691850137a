//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Code on the frame path MUST NOT call sleep methods. One module
//! that sleeps stalls every other module and the whole arbitration cycle.
//! **Exceptions**: the frame driver paces itself with `tokio::time::interval`;
//! service workers pace themselves with `ServiceContext::wait_cancelled`.

use architectural_enforcement::{frame_path_lines, SourceLine};

/// Test that frame-path code does not contain sleep() calls
#[test]
fn test_no_sleep_on_frame_path() {
    let violations: Vec<SourceLine> = frame_path_lines()
        .into_iter()
        .filter(|line| is_sleep_call(&line.code))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found on the frame path!\n");

        for violation in &violations {
            eprintln!("  ❌ {}", violation);
        }

        eprintln!("\n✅ ACCEPTABLE pacing:");
        eprintln!("  - tokio::time::interval() in the frame driver");
        eprintln!("  - ServiceContext::wait_cancelled() in service workers");
        eprintln!("  - Test code (#[cfg(test)] modules)");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in module hooks");
        eprintln!("  - Sleep as poor man's synchronization");

        panic!(
            "\nFound {} sleep violation(s) on the frame path.\nFix these before merging!",
            violations.len()
        );
    }
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(") || code.contains("sleep_until(")
}

#[test]
fn test_sleep_detection() {
    assert!(is_sleep_call("    std::thread::sleep(Duration::from_millis(10));"));
    assert!(is_sleep_call("    tokio::time::sleep(frame).await;"));
    assert!(!is_sleep_call("    let mut interval = tokio::time::interval(period);"));
}
