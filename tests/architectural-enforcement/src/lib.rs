//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! of the sentinel core:
//! - No sleep() calls on the frame path
//! - No blocking I/O on the frame path
//!
//! The frame path is everything the frame driver runs on its own thread: the
//! event bus, the module registry and built-in modules, the arbitration
//! engine, and the driver itself. Service workers are exempt; they run on
//! their own threads and may block on I/O.
//!
//! These tests are designed to catch violations early in the development cycle.

use std::fs;
use std::path::{Path, PathBuf};

/// Files and directories under `sentinel/core/src` on the frame path
pub const FRAME_PATH: &[&str] = &[
    "bus.rs",
    "modules",
    "arbitration",
    "driver.rs",
    "render.rs",
    "context.rs",
];

/// A production source line with comments stripped
#[derive(Debug, Clone)]
pub struct SourceLine {
    /// File the line came from
    pub path: PathBuf,
    /// 1-based line number
    pub number: usize,
    /// The line without any trailing `//` comment
    pub code: String,
    /// The untouched line, for reporting
    pub raw: String,
}

impl std::fmt::Display for SourceLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.number, self.raw.trim())
    }
}

/// `sentinel/core/src` in this workspace
#[must_use]
pub fn core_src() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("sentinel")
        .join("core")
        .join("src")
}

/// Every production line of the frame-path sources
///
/// Test modules are skipped: scanning of a file stops at its first
/// `#[cfg(test)]` attribute. Doc comments and line comments are ignored.
#[must_use]
pub fn frame_path_lines() -> Vec<SourceLine> {
    let root = core_src();
    let mut lines = Vec::new();
    for entry in FRAME_PATH {
        let path = root.join(entry);
        if path.is_dir() {
            for file in walkdir::WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                if file.path().extension().and_then(|s| s.to_str()) == Some("rs") {
                    lines.extend(production_lines(file.path()));
                }
            }
        } else {
            lines.extend(production_lines(&path));
        }
    }
    lines
}

/// Production lines of one file
#[must_use]
pub fn production_lines(path: &Path) -> Vec<SourceLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };
    scan(path, &content)
}

/// Split `content` into production lines
#[must_use]
pub fn scan(path: &Path, content: &str) -> Vec<SourceLine> {
    let mut lines = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = line.split("//").next().unwrap_or(line).to_string();
        lines.push(SourceLine {
            path: path.to_path_buf(),
            number: idx + 1,
            code,
            raw: line.to_string(),
        });
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_stops_at_test_module() {
        let content = "fn a() {}\n// comment\nfn b() {} // trailing\n#[cfg(test)]\nmod tests { fn c() {} }\n";
        let lines = scan(Path::new("x.rs"), content);
        let code: Vec<_> = lines.iter().map(|l| l.code.trim().to_string()).collect();
        assert_eq!(code, vec!["fn a() {}", "fn b() {}"]);
        assert_eq!(lines[1].number, 3);
    }

    #[test]
    fn test_core_sources_are_found() {
        assert!(core_src().join("lib.rs").exists());
        assert!(!frame_path_lines().is_empty());
    }
}
