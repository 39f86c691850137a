//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Code on the frame path MUST NOT perform blocking I/O. Nothing
//! in the event bus, registry, or arbitration engine blocks on external I/O;
//! only service workers do, on their own threads.

use architectural_enforcement::{frame_path_lines, SourceLine};

const FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("use std::fs", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("use std::net", "Blocking network I/O"),
    ("std::process::Command", "Blocking process I/O"),
    ("std::io::stdin", "Blocking terminal I/O"),
    ("reqwest::blocking", "Blocking HTTP client"),
    (".read_line(", "Blocking terminal I/O"),
];

/// Test that frame-path code does not use blocking I/O
#[test]
fn test_no_blocking_io_on_frame_path() {
    let violations: Vec<(SourceLine, &str)> = frame_path_lines()
        .into_iter()
        .filter_map(|line| classify(&line.code).map(|kind| (line, kind)))
        .collect();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found on the frame path!\n");

        for (line, kind) in &violations {
            eprintln!("  ❌ {kind}: {line}");
        }

        eprintln!("\n✅ ACCEPTABLE blocking I/O:");
        eprintln!("  - Configuration loading, before the driver starts");
        eprintln!("  - Service workers, on their own threads");
        eprintln!("  - Test code");

        panic!(
            "\nFound {} blocking I/O violation(s) on the frame path.\nFix these before merging!",
            violations.len()
        );
    }
}

fn classify(code: &str) -> Option<&'static str> {
    FORBIDDEN
        .iter()
        .find(|(pattern, _)| code.contains(*pattern))
        .map(|(_, kind)| *kind)
}

#[test]
fn test_blocking_io_detection() {
    assert_eq!(
        classify("    let text = std::fs::read_to_string(path)?;"),
        Some("Blocking file I/O")
    );
    assert_eq!(classify("use std::net::TcpStream;"), Some("Blocking network I/O"));
    assert_eq!(classify("    let period = self.config.core.frame_period();"), None);
}
