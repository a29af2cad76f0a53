use serde::{Deserialize, Serialize};

use crate::checkpoint::id::CheckpointId;
use crate::checkpoint::paths::is_protected_path;
use crate::checkpoint::shadow::shadow_branch_name;
use crate::checkpoint::trailers::extract_checkpoint_id;
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::session::state::SessionStore;
use crate::utils::{debug_log, write_atomic};

/// How far back the trailer scan looks when resolving a checkpoint id to a
/// commit.
const TRAILER_SCAN_LIMIT: usize = 50;

/// One uncommitted file in the dirty-tree report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirtyFile {
    pub path: String,
    pub added: u64,
    pub removed: u64,
}

/// Summary of uncommitted changes. The engine surfaces this and lets the
/// caller decide; it never refuses a rewind on dirtiness by itself.
pub fn working_tree_report(repo: &Repository) -> Result<Vec<DirtyFile>, EntireError> {
    let mut report = Vec::new();

    let args: Vec<String> = repo
        .global_args_for_exec()
        .into_iter()
        .chain(["diff", "HEAD", "--numstat", "--no-renames"].map(String::from))
        .collect();
    if let Ok(output) = crate::git::repository::exec_git(&args) {
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        for line in stdout.lines() {
            let mut fields = line.split('\t');
            let (Some(added), Some(removed), Some(path)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            report.push(DirtyFile {
                path: path.to_string(),
                // Binary files show "-"
                added: added.parse().unwrap_or(0),
                removed: removed.parse().unwrap_or(0),
            });
        }
    }

    for path in repo.untracked_files()? {
        if is_protected_path(&path) {
            continue;
        }
        let added = std::fs::read_to_string(repo.workdir().join(&path))
            .map(|c| c.lines().count() as u64)
            .unwrap_or(0);
        report.push(DirtyFile {
            path,
            added,
            removed: 0,
        });
    }

    Ok(report)
}

/// Resolve a rewind target: a checkpoint id is matched against recent commit
/// trailers; anything else must name a commit directly.
pub fn resolve_target(repo: &Repository, spec: &str) -> Result<String, EntireError> {
    if let Ok(id) = spec.parse::<CheckpointId>() {
        for commit in repo.recent_commits(TRAILER_SCAN_LIMIT)? {
            let Ok(message) = repo.commit_message(&commit) else {
                continue;
            };
            if extract_checkpoint_id(&message).as_ref() == Some(&id) {
                return Ok(commit);
            }
        }
        return Err(EntireError::Generic(format!(
            "No commit in the last {} carries checkpoint {}",
            TRAILER_SCAN_LIMIT, id
        )));
    }

    let commit = repo.rev_parse(&format!("{}^{{commit}}", spec))?;
    Ok(commit)
}

/// Rewind the worktree to a target commit:
///
/// 1. verify the target exists,
/// 2. hard-reset via the git executable (untracked files under ignored and
///    protected directories are left alone),
/// 3. re-create files that were untracked when a session started and that the
///    target does not contain, reading them back from the shadow branch,
/// 4. optionally delete shadow branches whose base no longer matches HEAD.
///
/// No step may ever write under a protected path.
pub fn rewind(
    repo: &Repository,
    target_commit: &str,
    delete_stale_shadows: bool,
) -> Result<(), EntireError> {
    if !repo.commit_exists(target_commit) {
        return Err(EntireError::Generic(format!(
            "Rewind target {} does not exist",
            target_commit
        )));
    }

    repo.reset_hard(target_commit)?;

    let store = SessionStore::new(repo.common_dir());
    let sessions = store.for_worktree(repo.workdir())?;

    for state in &sessions {
        if state.base_commit.is_empty() {
            continue;
        }
        let shadow = shadow_branch_name(&state.base_commit, &state.worktree_id);
        let Some(shadow_tip) = repo.branch_tip(&shadow) else {
            continue;
        };

        for path in &state.untracked_files_at_start {
            if is_protected_path(path) {
                continue;
            }
            // Present in the target commit or already on disk: nothing to do.
            if repo.file_in_tree(target_commit, path).is_some() {
                continue;
            }
            let abs = repo.workdir().join(path);
            if abs.exists() {
                continue;
            }
            let Some(content) = repo.file_in_tree(&shadow_tip, path) else {
                continue;
            };
            write_atomic(&abs, &content)?;
            debug_log(&format!("restored untracked file {}", path));
        }
    }

    if delete_stale_shadows {
        let head = repo.head_commit()?;
        for state in &sessions {
            if state.base_commit.is_empty() || state.base_commit == head {
                continue;
            }
            let shadow = shadow_branch_name(&state.base_commit, &state.worktree_id);
            match repo.delete_branch(&shadow) {
                Ok(()) | Err(EntireError::BranchNotFound(_)) => {}
                Err(e) => debug_log(&format!("could not delete stale shadow {}: {}", shadow, e)),
            }
        }
    }

    Ok(())
}
