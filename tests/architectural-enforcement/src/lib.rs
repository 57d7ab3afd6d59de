//! Architectural Enforcement Integration Tests
//!
//! Source scanners behind the workspace's architecture tests:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//!
//! The scanners are line based. Test code is recognised by the
//! `#[cfg(test)]` module every crate keeps at the bottom of a file, and by
//! `#[test]` / `#[tokio::test]` attributes.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source trees checked by the enforcement tests
pub const PRODUCTION_DIRS: &[&str] = &["duet/core/src", "duet/cli/src"];

/// A rule hit in a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File the hit is in
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// What was found
    pub kind: &'static str,
    /// The offending line, trimmed
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.kind,
            self.text
        )
    }
}

/// Root of the workspace this crate lives in
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// Every `.rs` file under the production source trees
#[must_use]
pub fn production_files() -> Vec<PathBuf> {
    let root = workspace_root();
    PRODUCTION_DIRS
        .iter()
        .map(|dir| root.join(dir))
        .filter(|dir| dir.exists())
        .flat_map(|dir| {
            walkdir::WalkDir::new(dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
                .map(|e| e.into_path())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Run a line checker over every production file
pub fn scan<F>(check: F) -> Vec<Violation>
where
    F: Fn(&[&str], usize) -> Option<&'static str>,
{
    let mut violations = Vec::new();
    for path in production_files() {
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        for idx in 0..lines.len() {
            if let Some(kind) = check(&lines, idx) {
                violations.push(Violation {
                    path: path.clone(),
                    line: idx + 1,
                    kind,
                    text: lines[idx].trim().to_string(),
                });
            }
        }
    }
    violations
}

/// The part of a line before any `//` comment
#[must_use]
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Whether a trimmed line opens a function, and whether it is async
#[must_use]
pub fn fn_signature(line: &str) -> Option<bool> {
    let mut rest = line.trim();
    for prefix in ["pub(crate) ", "pub(super) ", "pub "] {
        if let Some(stripped) = rest.strip_prefix(prefix) {
            rest = stripped;
            break;
        }
    }
    let is_async = rest.starts_with("async ");
    let rest = rest.strip_prefix("async ").unwrap_or(rest);
    rest.starts_with("fn ").then_some(is_async)
}

/// Whether the line at `idx` is test code
#[must_use]
pub fn is_test_code(lines: &[&str], idx: usize) -> bool {
    if lines[..=idx]
        .iter()
        .any(|l| l.trim().starts_with("#[cfg(test)]"))
    {
        return true;
    }

    let Some(fn_idx) = enclosing_fn(lines, idx).map(|(i, _)| i) else {
        return false;
    };
    for line in lines[..fn_idx].iter().rev() {
        let line = line.trim();
        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if !line.starts_with("#[") && !line.starts_with("///") {
            break;
        }
    }
    false
}

/// Nearest function signature at or above `idx`, with its asyncness
#[must_use]
pub fn enclosing_fn(lines: &[&str], idx: usize) -> Option<(usize, bool)> {
    for i in (0..=idx).rev() {
        let line = lines[i].trim();
        if let Some(is_async) = fn_signature(line) {
            return Some((i, is_async));
        }
        // Stop at item boundaries
        if line.starts_with("mod ") || (line.starts_with("impl") && line.ends_with('{')) {
            return None;
        }
    }
    None
}

/// Whether the line at `idx` sits inside an `async fn`
#[must_use]
pub fn is_in_async_fn(lines: &[&str], idx: usize) -> bool {
    enclosing_fn(lines, idx).is_some_and(|(_, is_async)| is_async)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_signature() {
        assert_eq!(fn_signature("pub async fn send(&self) {"), Some(true));
        assert_eq!(fn_signature("    pub(crate) fn begin_call("), Some(false));
        assert_eq!(fn_signature("fn main() {"), Some(false));
        assert_eq!(fn_signature("let f = fnord;"), None);
    }

    #[test]
    fn test_async_detection() {
        let code = [
            "pub async fn load() {",
            "    let s = std::fs::read_to_string(\"x\");",
            "}",
            "pub fn load_sync() {",
            "    let s = std::fs::read_to_string(\"x\");",
            "}",
        ];
        assert!(is_in_async_fn(&code, 1));
        assert!(!is_in_async_fn(&code, 4));
    }

    #[test]
    fn test_test_code_detection() {
        let code = [
            "#[tokio::test]",
            "async fn test_thing() {",
            "    tokio::time::sleep(d).await;",
            "}",
            "fn helper() {",
            "    tokio::time::sleep(d).await;",
            "}",
        ];
        assert!(is_test_code(&code, 2));
        assert!(!is_test_code(&code, 5));

        let module = ["fn prod() {}", "#[cfg(test)]", "mod tests {", "    fn x() {}", "}"];
        assert!(!is_test_code(&module, 0));
        assert!(is_test_code(&module, 3));
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // sleep(1)"), "let x = 1; ");
    }

    #[test]
    fn test_production_dirs_exist() {
        assert!(!production_files().is_empty());
    }
}
