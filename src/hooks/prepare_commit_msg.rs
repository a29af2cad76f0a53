use std::fs;
use std::path::Path;

use crate::checkpoint::id::CheckpointId;
use crate::checkpoint::trailers::{append_checkpoint_trailer, has_checkpoint_trailer};
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::hooks::session_has_new_content;
use crate::hooks::tty::Confirm;
use crate::session::machine::Phase;
use crate::session::state::{SessionState, SessionStore};
use crate::utils::{debug_log, truncate_chars};

/// The `prepare-commit-msg` contract: decide whether this commit belongs to
/// an agent session and, if so, plant the checkpoint trailer that post-commit
/// will honor. Never blocks the commit.
pub fn run(
    repo: &Repository,
    msg_file: &Path,
    source: Option<&str>,
    confirm: &dyn Confirm,
) -> Result<(), EntireError> {
    // Merge and squash commits are never agent work.
    if matches!(source, Some("merge") | Some("squash")) {
        return Ok(());
    }
    // Replayed commits during rebase / cherry-pick / revert keep their
    // original messages untouched.
    if repo.sequence_operation_in_progress() {
        return Ok(());
    }

    let message = fs::read_to_string(msg_file)?;
    let store = SessionStore::new(repo.common_dir());
    let sessions = store.for_worktree(repo.workdir())?;

    // Amend: preserve an existing trailer; restore the last checkpoint id
    // only when the session still sits on the commit being amended.
    if source == Some("commit") {
        if has_checkpoint_trailer(&message) {
            return Ok(());
        }
        let head = repo.head_commit()?;
        for state in &sessions {
            if state.base_commit == head
                && let Some(ref id) = state.last_checkpoint_id
            {
                write_with_trailer(msg_file, &message, id, false)?;
                return Ok(());
            }
        }
        return Ok(());
    }

    if sessions.is_empty() || has_checkpoint_trailer(&message) {
        return Ok(());
    }

    // No terminal plus an in-flight session means the agent itself is
    // committing: take the fast path without asking questions.
    if !confirm.has_tty() && sessions.iter().any(|s| s.phase == Phase::Active) {
        let id = CheckpointId::generate();
        write_with_trailer(msg_file, &message, &id, false)?;
        return Ok(());
    }

    let staged = repo.staged_files().unwrap_or_default();
    let candidates: Vec<&SessionState> = sessions
        .iter()
        .filter(|s| session_has_new_content(repo, s, &staged))
        .collect();
    let Some(owner) = candidates.first() else {
        return Ok(());
    };

    if source == Some("message") {
        // `git commit -m`: the editor never opens, so ask on /dev/tty.
        let question = format!(
            "Link this commit to the {} session?",
            owner.agent_type.display_name()
        );
        let context = owner
            .first_prompt
            .as_deref()
            .map(|p| format!("Last prompt: {}", truncate_chars(p, 120)))
            .unwrap_or_default();
        if !confirm.confirm(&question, &context, true) {
            debug_log("user declined checkpoint trailer");
            return Ok(());
        }
        let id = CheckpointId::generate();
        write_with_trailer(msg_file, &message, &id, false)?;
        return Ok(());
    }

    // Editor flow: add the trailer plus the removable-comment explainer.
    let id = CheckpointId::generate();
    write_with_trailer(msg_file, &message, &id, true)?;
    Ok(())
}

fn write_with_trailer(
    msg_file: &Path,
    message: &str,
    id: &CheckpointId,
    editor_mode: bool,
) -> Result<(), EntireError> {
    let updated = append_checkpoint_trailer(message, id, editor_mode);
    fs::write(msg_file, updated)?;
    Ok(())
}
