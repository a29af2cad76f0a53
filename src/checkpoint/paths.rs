use crate::checkpoint::id::CheckpointId;
use crate::transcript::AgentType;
use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::RwLock;

/// Worktree directory holding all of this tool's state.
pub const ENTIRE_DIR: &str = ".entire";

/// Sharded directory of a checkpoint on the checkpoint branch:
/// `<id[0:2]>/<id[2:12]>`.
pub fn checkpoint_dir(id: &CheckpointId) -> String {
    format!("{}/{}", id.shard(), id.rest())
}

/// Reverse of `checkpoint_dir`: a depth-2 sharded directory maps back to a
/// checkpoint id, or None when the components are not a valid id.
pub fn checkpoint_id_from_dir(shard: &str, rest: &str) -> Option<CheckpointId> {
    format!("{}{}", shard, rest).parse().ok()
}

/// Session slot inside a checkpoint directory.
pub fn session_dir(id: &CheckpointId, session_id: &str) -> String {
    format!("{}/{}", checkpoint_dir(id), session_id)
}

/// In-worktree metadata directory for a live session.
pub fn metadata_dir(session_id: &str) -> String {
    format!("{}/metadata/{}", ENTIRE_DIR, session_id)
}

/// Short-lived pre-prompt state file.
pub fn pre_prompt_path(session_id: &str) -> String {
    format!("{}/tmp/pre-prompt-{}.json", ENTIRE_DIR, session_id)
}

/// Short-lived pre-task state file.
pub fn pre_task_path(tool_use_id: &str) -> String {
    format!("{}/tmp/pre-task-{}.json", ENTIRE_DIR, tool_use_id)
}

/// Session identifiers start with a YYYY-MM-DD- prefix and are used as path
/// components, so anything resembling traversal is rejected.
pub fn is_valid_session_id(session_id: &str) -> bool {
    if session_id.len() < 12 {
        return false;
    }
    let bytes = session_id.as_bytes();
    let date_shaped = bytes[0..4].iter().all(|b| b.is_ascii_digit())
        && bytes[4] == b'-'
        && bytes[5..7].iter().all(|b| b.is_ascii_digit())
        && bytes[7] == b'-'
        && bytes[8..10].iter().all(|b| b.is_ascii_digit())
        && bytes[10] == b'-';
    date_shaped
        && !session_id.contains('/')
        && !session_id.contains('\\')
        && !session_id.contains("..")
}

static PROTECTED_DIRS: Lazy<RwLock<Option<Vec<String>>>> = Lazy::new(|| RwLock::new(None));

/// Directories that rewind and destructive staging must never touch: `.git`,
/// `.entire`, and each registered agent's config dir. Computed once; tests
/// that mutate the agent registry call `reset_protected_dirs_for_test`.
pub fn protected_dirs() -> Vec<String> {
    if let Ok(guard) = PROTECTED_DIRS.read()
        && let Some(dirs) = guard.as_ref()
    {
        return dirs.clone();
    }

    let mut dirs = vec![".git".to_string(), ENTIRE_DIR.to_string()];
    for agent in AgentType::all() {
        dirs.push(agent.config_dir().to_string());
    }
    if let Ok(mut guard) = PROTECTED_DIRS.write() {
        *guard = Some(dirs.clone());
    }
    dirs
}

#[cfg(any(test, feature = "test-support"))]
pub fn reset_protected_dirs_for_test() {
    if let Ok(mut guard) = PROTECTED_DIRS.write() {
        *guard = None;
    }
}

/// A path is protected iff it equals a protected dir or is a descendant.
pub fn is_protected_path(path: &str) -> bool {
    let normalized = crate::utils::normalize_to_posix(path);
    let normalized = normalized.trim_start_matches("./");
    protected_dirs().iter().any(|dir| {
        normalized == dir.as_str() || normalized.starts_with(&format!("{}/", dir))
    })
}

/// Convenience for absolute paths under a known worktree root.
pub fn is_protected_abs(worktree_root: &Path, path: &Path) -> bool {
    match path.strip_prefix(worktree_root) {
        Ok(rel) => is_protected_path(&rel.to_string_lossy()),
        Err(_) => false,
    }
}
