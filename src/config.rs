use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{OnceLock, RwLock};

/// Resolved process-wide settings. Repo-level `.entire/settings.json` is
/// merged over the user-level file, which is merged over defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    git_path: String,
    default_agent: Option<String>,
    telemetry_enabled: bool,
}

/// On-disk shape of `.entire/settings.json`. Every field optional so partial
/// files merge cleanly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_agent: Option<String>,
    /// "on" or "off"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<String>,
}

static SETTINGS: OnceLock<RwLock<Settings>> = OnceLock::new();

impl Settings {
    pub fn get() -> Settings {
        SETTINGS
            .get_or_init(|| RwLock::new(build_settings(None)))
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| default_settings())
    }

    /// Re-resolve settings with a worktree root so its
    /// `.entire/settings.json` participates in the merge.
    pub fn load_for_worktree(worktree_root: &Path) {
        let resolved = build_settings(Some(worktree_root));
        let lock = SETTINGS.get_or_init(|| RwLock::new(default_settings()));
        if let Ok(mut guard) = lock.write() {
            *guard = resolved;
        }
    }

    /// Drop any cached settings so the next `get` re-resolves from disk and
    /// environment. Tests that mutate `ENTIRE_*` variables call this.
    #[cfg(any(test, feature = "test-support"))]
    pub fn reset_for_test() {
        let lock = SETTINGS.get_or_init(|| RwLock::new(default_settings()));
        if let Ok(mut guard) = lock.write() {
            *guard = build_settings(None);
        }
    }

    pub fn git_cmd(&self) -> &str {
        &self.git_path
    }

    pub fn default_agent(&self) -> Option<&str> {
        self.default_agent.as_deref()
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry_enabled
    }
}

fn default_settings() -> Settings {
    Settings {
        git_path: "git".to_string(),
        default_agent: None,
        telemetry_enabled: true,
    }
}

fn read_file_settings(path: &Path) -> Option<FileSettings> {
    let content = fs::read_to_string(path).ok()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(&content).ok()
}

fn user_settings_path() -> Option<std::path::PathBuf> {
    dirs::config_dir().map(|d| d.join("entire").join("settings.json"))
}

fn build_settings(worktree_root: Option<&Path>) -> Settings {
    let mut settings = default_settings();

    let mut layers: Vec<FileSettings> = Vec::new();
    if let Some(path) = user_settings_path()
        && let Some(fc) = read_file_settings(&path)
    {
        layers.push(fc);
    }
    if let Some(root) = worktree_root
        && let Some(fc) = read_file_settings(&root.join(".entire").join("settings.json"))
    {
        layers.push(fc);
    }

    for layer in layers {
        if let Some(git_path) = layer.git_path
            && !git_path.trim().is_empty()
        {
            settings.git_path = git_path;
        }
        if layer.default_agent.is_some() {
            settings.default_agent = layer.default_agent;
        }
        if let Some(telemetry) = layer.telemetry {
            settings.telemetry_enabled = telemetry.trim().eq_ignore_ascii_case("on");
        }
    }

    // Any non-empty value disables the telemetry collaborator outright.
    if std::env::var("ENTIRE_TELEMETRY_OPTOUT")
        .map(|v| !v.is_empty())
        .unwrap_or(false)
    {
        settings.telemetry_enabled = false;
    }

    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_defaults() {
        unsafe { std::env::remove_var("ENTIRE_TELEMETRY_OPTOUT") };
        Settings::reset_for_test();
        let s = Settings::get();
        assert_eq!(s.git_cmd(), "git");
        assert!(s.default_agent().is_none());
    }

    #[test]
    #[serial]
    fn test_telemetry_optout_env() {
        unsafe { std::env::set_var("ENTIRE_TELEMETRY_OPTOUT", "1") };
        Settings::reset_for_test();
        assert!(!Settings::get().telemetry_enabled());
        unsafe { std::env::remove_var("ENTIRE_TELEMETRY_OPTOUT") };
        Settings::reset_for_test();
    }

    #[test]
    #[serial]
    fn test_worktree_settings_merge() {
        unsafe { std::env::remove_var("ENTIRE_TELEMETRY_OPTOUT") };
        let dir = tempfile::tempdir().unwrap();
        let entire_dir = dir.path().join(".entire");
        fs::create_dir_all(&entire_dir).unwrap();
        fs::write(
            entire_dir.join("settings.json"),
            r#"{"default_agent": "claude-code", "telemetry": "off"}"#,
        )
        .unwrap();

        Settings::load_for_worktree(dir.path());
        let s = Settings::get();
        assert_eq!(s.default_agent(), Some("claude-code"));
        assert!(!s.telemetry_enabled());
        Settings::reset_for_test();
    }
}
