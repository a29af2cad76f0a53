use crate::error::EntireError;
use std::fs;
use std::io::IsTerminal;
use std::path::Path;
use std::sync::OnceLock;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();
static IS_TERMINAL: OnceLock<bool> = OnceLock::new();

fn is_debug_enabled() -> bool {
    *DEBUG_ENABLED.get_or_init(|| std::env::var("ENTIRE_DEBUG").unwrap_or_default() == "1")
}

/// Debug logging to stderr, enabled with `ENTIRE_DEBUG=1`.
pub fn debug_log(msg: &str) {
    if is_debug_enabled() {
        eprintln!("\x1b[1;33m[entire]\x1b[0m {}", msg);
    }
}

#[inline]
pub fn normalize_to_posix(path: &str) -> String {
    path.replace('\\', "/")
}

/// Whether stdin is attached to a terminal. `ENTIRE_TEST_TTY` overrides the
/// real detection ("1" = pretend present, "0" = pretend absent) so tests are
/// deterministic; the override is read on every call, the real answer once.
pub fn is_interactive_terminal() -> bool {
    match std::env::var("ENTIRE_TEST_TTY") {
        Ok(v) if v == "1" => return true,
        Ok(v) if v == "0" => return false,
        _ => {}
    }
    *IS_TERMINAL.get_or_init(|| std::io::stdin().is_terminal())
}

/// Write a file atomically: temp file in the same directory, then rename over
/// the destination.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), EntireError> {
    let dir = path
        .parent()
        .ok_or_else(|| EntireError::Generic(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let tmp = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("entire"),
        std::process::id()
    ));
    fs::write(&tmp, contents)?;
    if let Ok(f) = fs::File::open(&tmp) {
        let _ = f.sync_all();
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Truncate a string to at most `max_chars` characters, appending an ellipsis
/// when anything was cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{}...", truncated.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_to_posix() {
        assert_eq!(normalize_to_posix("a\\b\\c.txt"), "a/b/c.txt");
        assert_eq!(normalize_to_posix("a/b/c.txt"), "a/b/c.txt");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello world", 5), "hello...");
    }

    #[test]
    fn test_write_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        // Overwrite through the same path
        write_atomic(&path, b"[]").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"[]");
    }
}
