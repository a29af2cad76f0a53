pub mod commit_msg;
pub mod install;
pub mod post_commit;
pub mod prepare_commit_msg;
pub mod pre_push;
pub mod tty;

use std::fs;

use crate::git::repository::Repository;
use crate::session::state::SessionState;
use crate::transcript::{count_items, extract_modified_files};

/// Whether a session has condensable content that the next commit could own:
/// shadow steps, touched files, or live transcript growth whose
/// file-modifying tool calls overlap the staged files.
pub fn session_has_new_content(
    repo: &Repository,
    state: &SessionState,
    staged_files: &[String],
) -> bool {
    if state.step_count > 0 {
        return true;
    }
    if !state.files_touched.is_empty() {
        return true;
    }

    // Shadow-branch-not-found territory: fall back to the live transcript.
    let Some(ref transcript_path) = state.transcript_path else {
        return false;
    };
    let Ok(content) = fs::read_to_string(transcript_path) else {
        return false;
    };
    let total = count_items(state.agent_type, &content);
    if total <= state.checkpoint_transcript_start {
        return false;
    }
    let modified = extract_modified_files(
        state.agent_type,
        &content,
        state.checkpoint_transcript_start,
        repo.workdir(),
    );
    modified.iter().any(|f| staged_files.contains(f))
}

/// Overlap between the files a commit changed and the files a session
/// touched, by path.
pub fn paths_overlap(commit_files: &[String], state: &SessionState) -> bool {
    commit_files.iter().any(|f| state.files_touched.contains(f))
}
