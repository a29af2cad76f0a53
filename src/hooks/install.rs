use std::fs;
use std::path::{Path, PathBuf};

use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::utils::debug_log;

/// Marker every installed script carries; uninstall and cleanup key off it.
pub const HOOK_MARKER: &str = "Entire CLI hooks";

/// The git hooks this system participates in.
pub const HOOK_NAMES: &[&str] = &[
    "prepare-commit-msg",
    "commit-msg",
    "post-commit",
    "pre-push",
];

fn hooks_dir(repo: &Repository) -> PathBuf {
    repo.common_dir().join("hooks")
}

fn backup_path(hook_path: &Path) -> PathBuf {
    let mut name = hook_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    name.push_str(".pre-entire");
    hook_path.with_file_name(name)
}

fn script_for(hook: &str) -> String {
    // commit-msg is the one hook whose non-zero exit must block the commit;
    // every other script swallows our failures. All scripts chain to a
    // side-renamed pre-existing hook afterwards.
    let invoke = if hook == "commit-msg" {
        format!("entire hooks git {} \"$@\" || exit $?", hook)
    } else {
        format!("entire hooks git {} \"$@\" || true", hook)
    };
    format!(
        "#!/bin/sh\n# {}\n{}\nif [ -x \"$0.pre-entire\" ]; then\n  exec \"$0.pre-entire\" \"$@\"\nfi\nexit 0\n",
        HOOK_MARKER, invoke
    )
}

fn contains_marker(path: &Path) -> bool {
    fs::read_to_string(path)
        .map(|c| c.contains(HOOK_MARKER))
        .unwrap_or(false)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), EntireError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), EntireError> {
    Ok(())
}

/// Install the four hook scripts. A pre-existing hook of the same name is
/// renamed to `<name>.pre-entire` and chained to after our logic.
pub fn install(repo: &Repository) -> Result<(), EntireError> {
    let dir = hooks_dir(repo);
    fs::create_dir_all(&dir)?;

    for hook in HOOK_NAMES {
        let hook_path = dir.join(hook);

        if hook_path.exists() && !contains_marker(&hook_path) {
            let backup = backup_path(&hook_path);
            if backup.exists() {
                return Err(EntireError::Generic(format!(
                    "Hook backup already exists: {}",
                    backup.display()
                )));
            }
            fs::rename(&hook_path, &backup)?;
            debug_log(&format!("backed up existing {} hook", hook));
        }

        fs::write(&hook_path, script_for(hook))?;
        make_executable(&hook_path)?;
    }
    Ok(())
}

/// Remove our hook scripts and restore any `.pre-entire` backups. Stale
/// side-renamed copies of our own scripts (renamed by other tools to
/// `<name>.pre-*`) are cleaned up by their marker.
pub fn uninstall(repo: &Repository) -> Result<(), EntireError> {
    let dir = hooks_dir(repo);
    if !dir.is_dir() {
        return Ok(());
    }

    for hook in HOOK_NAMES {
        let hook_path = dir.join(hook);
        if hook_path.exists() && contains_marker(&hook_path) {
            fs::remove_file(&hook_path)?;
            let backup = backup_path(&hook_path);
            if backup.exists() {
                fs::rename(&backup, &hook_path)?;
            }
        }
    }

    // Marker-bearing strays like prepare-commit-msg.pre-husky
    for entry in fs::read_dir(&dir)?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if HOOK_NAMES
            .iter()
            .any(|h| name.starts_with(&format!("{}.pre-", h)))
            && contains_marker(&path)
        {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Whether our scripts are currently installed.
pub fn is_installed(repo: &Repository) -> bool {
    let dir = hooks_dir(repo);
    HOOK_NAMES.iter().all(|hook| {
        let path = dir.join(hook);
        path.exists() && contains_marker(&path)
    })
}
