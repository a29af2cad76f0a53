use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use crate::attribution::{InitialAttribution, calculate_attribution_with_accumulated};
use crate::checkpoint::id::CheckpointId;
use crate::checkpoint::paths::metadata_dir;
use crate::checkpoint::shadow::{
    carry_forward, delete_shadow, shadow_branch_name, tree_files_for_paths,
};
use crate::checkpoint::store::{WriteCommittedOptions, write_committed};
use crate::checkpoint::trailers::extract_checkpoint_id;
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::git::tree::EMPTY_TREE_OID;
use crate::hooks::{paths_overlap, session_has_new_content};
use crate::logging::SessionLogger;
use crate::session::machine::{Action, Event, Phase, transition};
use crate::session::state::{SessionState, SessionStore};
use crate::transcript::{count_items, extract_user_prompts, token_usage};
use crate::utils::debug_log;

/// The `post-commit` contract: figure out which sessions own the commit that
/// just landed, condense their shadow snapshots into checkpoints, carry
/// forward what the commit did not absorb, and retire shadow branches nobody
/// needs anymore. All failures are reported as warnings; the user's commit
/// always stands.
pub fn run(repo: &Repository) -> Result<(), EntireError> {
    let head = repo.head_commit()?;
    let store = SessionStore::new(repo.common_dir());
    let mut sessions = store.for_worktree(repo.workdir())?;
    if sessions.is_empty() {
        return Ok(());
    }

    // Replayed commits during a sequence operation advance ACTIVE bases but
    // never condense and never honor a trailer.
    if repo.sequence_operation_in_progress() {
        for state in sessions.iter_mut() {
            let (phase, actions) = transition(state.phase, Event::RebaseDetected);
            debug_assert!(actions.is_empty());
            state.phase = phase;
            if state.phase == Phase::Active {
                state.base_commit = head.clone();
            }
            store.save(state)?;
        }
        return Ok(());
    }

    let message = repo.commit_message(&head)?;
    let Some(checkpoint_id) = extract_checkpoint_id(&message) else {
        for state in sessions.iter_mut() {
            if state.phase == Phase::Active {
                state.base_commit = head.clone();
                store.save(state)?;
            }
        }
        return Ok(());
    };

    let commit_files = commit_changed_files(repo, &head)?;
    let staged: Vec<String> = commit_files.clone();

    // Shadow branches in play, keyed by their pre-commit base.
    let mut shadow_usage: BTreeMap<String, Vec<(String, bool)>> = BTreeMap::new();

    for state in sessions.iter_mut() {
        let logger = SessionLogger::new(repo.workdir(), &state.session_id);
        let old_shadow = shadow_branch_name(&state.base_commit, &state.worktree_id);
        let was_active = state.phase == Phase::Active;

        let owns_commit = if was_active {
            // The trailer was planted for this commit; trust it.
            true
        } else {
            session_has_new_content(repo, state, &staged)
                && paths_overlap(&commit_files, state)
                && content_overlap(repo, state, &head)
        };

        let (next_phase, actions) = transition(state.phase, Event::GitCommit);
        state.phase = next_phase;

        let mut condensed = false;
        let mut discarded = false;
        for action in actions {
            match action {
                Action::CondenseAndCarryForward => {
                    if !owns_commit || !state.has_recorded_work() {
                        continue;
                    }
                    if !paths_overlap(&commit_files, state) {
                        continue;
                    }
                    match condense_session(repo, state, &checkpoint_id, &head) {
                        Ok(()) => {
                            condensed = true;
                            state.turn_checkpoint_ids.push(checkpoint_id.clone());
                        }
                        Err(e) => {
                            eprintln!("warning: entire checkpoint not recorded: {}", e);
                            logger.error("condense", json!({"error": e.to_string()}));
                        }
                    }
                }
                Action::CondenseIfContentOverlaps | Action::CondenseOrDiscard => {
                    if owns_commit && state.has_recorded_work() {
                        match condense_session(repo, state, &checkpoint_id, &head) {
                            Ok(()) => condensed = true,
                            Err(e) => {
                                eprintln!("warning: entire checkpoint not recorded: {}", e);
                                logger.error("condense", json!({"error": e.to_string()}));
                            }
                        }
                    } else if action == Action::CondenseOrDiscard && !state.has_recorded_work() {
                        // Ended and empty: the session's state can go.
                        store.delete(&state.session_id)?;
                        discarded = true;
                    }
                }
                _ => {}
            }
        }

        shadow_usage
            .entry(old_shadow)
            .or_default()
            .push((state.session_id.clone(), condensed || !was_active));

        if !discarded {
            store.save(state)?;
        }
    }

    // A shadow branch is deleted only when every session sharing it is
    // non-ACTIVE or was condensed during this invocation.
    for (branch, users) in shadow_usage {
        if users.iter().all(|(_, done)| *done) {
            if let Err(e) = delete_shadow(repo, &branch) {
                debug_log(&format!("could not delete shadow {}: {}", branch, e));
            }
        }
    }

    Ok(())
}

/// Files the commit itself changed relative to its first parent.
fn commit_changed_files(repo: &Repository, head: &str) -> Result<Vec<String>, EntireError> {
    let parent = repo.rev_parse_opt(&format!("{}^", head));
    let base = parent.as_deref().unwrap_or(EMPTY_TREE_OID);
    repo.changed_files_between(base, head)
}

/// Content-level ownership check for non-ACTIVE sessions: the commit must
/// actually change the content of some file the session touched.
fn content_overlap(repo: &Repository, state: &SessionState, head: &str) -> bool {
    if state.base_commit.is_empty() {
        return false;
    }
    state.files_touched.iter().any(|path| {
        let base_oid = repo.rev_parse_opt(&format!("{}:{}", state.base_commit, path));
        let head_oid = repo.rev_parse_opt(&format!("{}:{}", head, path));
        base_oid != head_oid
    })
}

/// Condense one session's shadow snapshot plus transcript slice into a
/// committed checkpoint, then reset the session onto the new base and carry
/// forward whatever the commit left behind.
fn condense_session(
    repo: &Repository,
    state: &mut SessionState,
    checkpoint_id: &CheckpointId,
    head: &str,
) -> Result<(), EntireError> {
    let old_base = state.base_commit.clone();
    if old_base.is_empty() {
        return Err(EntireError::Generic(
            "session has no base commit yet".to_string(),
        ));
    }
    let shadow_branch = shadow_branch_name(&old_base, &state.worktree_id);
    let shadow_tip = repo.branch_tip(&shadow_branch);
    let files_touched = state.files_touched.clone();

    // Transcript slice for this checkpoint; the full-file count becomes the
    // next checkpoint's starting offset.
    let transcript_content = state
        .transcript_path
        .as_ref()
        .and_then(|p| fs::read_to_string(p).ok())
        .unwrap_or_default();
    let slice = crate::transcript::slice_from_offset(
        state.agent_type,
        &transcript_content,
        state.checkpoint_transcript_start,
    );
    let prompts = extract_user_prompts(state.agent_type, &slice);
    let usage = token_usage(
        state.agent_type,
        &transcript_content,
        state.checkpoint_transcript_start,
    );
    let new_transcript_start = count_items(state.agent_type, &transcript_content);

    // Fold the pending prompt-start snapshot before attribution.
    let mut attributions = state.prompt_attributions.clone();
    if let Some(pending) = state.pending_prompt_attribution.take() {
        attributions.push(pending);
    }

    let attribution = compute_attribution(repo, state, shadow_tip.as_deref(), head, &attributions);

    let context = fs::read_to_string(
        repo.workdir()
            .join(metadata_dir(&state.session_id))
            .join("context.md"),
    )
    .unwrap_or_default();

    let branch = repo.current_branch().unwrap_or_else(|| "HEAD".to_string());
    let files_vec: Vec<String> = files_touched.iter().cloned().collect();

    write_committed(
        repo,
        &WriteCommittedOptions {
            checkpoint_id: Some(checkpoint_id.clone()),
            session_id: &state.session_id,
            strategy: "manual-commit",
            branch: &branch,
            transcript: &slice,
            prompts: &prompts,
            context: &context,
            files_touched: &files_vec,
            checkpoints_count: state.step_count,
            shadow_branch: &shadow_branch,
            agent: state.agent_type,
            transcript_lines_at_start: state.transcript_lines_at_start,
            transcript_identifier_at_start: state.transcript_identifier_at_start.as_deref(),
            token_usage: usage,
            initial_attribution: Some(attribution),
            summary: None,
            is_task: false,
            tool_use_id: None,
        },
    )?;

    state.token_usage.add(&usage);
    state.reset_after_condense(head, checkpoint_id.clone());
    state.checkpoint_transcript_start = new_transcript_start;

    // Carry forward un-absorbed agent work onto a fresh shadow at HEAD. The
    // next checkpoint's transcript stays self-contained because the start
    // offset above was just reset.
    if let Some(ref shadow_commit) = shadow_tip {
        let carried = carry_forward(
            repo,
            &files_touched,
            shadow_commit,
            head,
            &state.worktree_id,
        )?;
        for file in &carried.remaining_files {
            state.files_touched.insert(file.clone());
        }
    }

    Ok(())
}

/// Gather the three snapshots the attribution engine diffs. Only paths that
/// can matter are read: the session's touched files plus everything the
/// commit changed relative to the session base.
fn compute_attribution(
    repo: &Repository,
    state: &SessionState,
    shadow_tip: Option<&str>,
    head: &str,
    attributions: &[crate::attribution::PromptAttribution],
) -> InitialAttribution {
    let mut relevant: BTreeSet<String> = state.files_touched.clone();
    if let Ok(changed) = repo.changed_files_between(&state.base_commit, head) {
        relevant.extend(changed);
    }

    let base_files = tree_files_for_paths(repo, &state.base_commit, &relevant);
    let shadow_files = match shadow_tip {
        Some(tip) => tree_files_for_paths(repo, tip, &relevant),
        // No snapshot was ever written: the agent recorded nothing.
        None => base_files.clone(),
    };
    let head_files = tree_files_for_paths(repo, head, &relevant);

    calculate_attribution_with_accumulated(
        &base_files,
        &shadow_files,
        &head_files,
        &state.files_touched,
        attributions,
    )
}
