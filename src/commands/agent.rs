use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::PathBuf;

use crate::attribution::calculate_prompt_attribution;
use crate::checkpoint::paths::{is_protected_path, metadata_dir, pre_prompt_path, pre_task_path};
use crate::checkpoint::shadow::{
    WriteTemporaryOptions, rename_for_new_base, shadow_branch_name, tree_files_for_paths,
    worktree_files_for_paths, write_temporary,
};
use crate::checkpoint::store::update_committed;
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::logging::SessionLogger;
use crate::session::machine::{Action, Event, transition};
use crate::session::state::{SessionState, SessionStore};
use crate::transcript::{
    AgentType, count_items, extract_modified_files, extract_user_prompts, last_identifier,
    slice_from_offset,
};
use crate::utils::{debug_log, truncate_chars, write_atomic};

/// Payload the agent-side hook pipes to us on stdin.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentHookPayload {
    pub session_id: String,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
}

impl AgentHookPayload {
    pub fn from_stdin() -> Result<AgentHookPayload, EntireError> {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(serde_json::from_str(&input)?)
    }

    fn agent_type(&self) -> AgentType {
        self.agent
            .as_deref()
            .and_then(AgentType::from_str_opt)
            .unwrap_or(AgentType::ClaudeCode)
    }
}

/// Session-id on disk carries the date prefix; agents hand us their native
/// id.
fn qualified_session_id(raw: &str) -> String {
    if raw.len() > 11 && raw.as_bytes()[4] == b'-' && raw.as_bytes()[7] == b'-' {
        // Already date-prefixed
        return raw.to_string();
    }
    format!("{}-{}", Utc::now().format("%Y-%m-%d"), raw)
}

/// Turn start: create or resume the session, migrate its shadow branch if
/// the base moved underneath it, and take the prompt-start attribution
/// snapshot.
pub fn turn_start(repo: &Repository, payload: &AgentHookPayload) -> Result<(), EntireError> {
    let session_id = qualified_session_id(&payload.session_id);
    let store = SessionStore::new(repo.common_dir());
    let head = repo.head_commit()?;

    let mut state = match store.load(&session_id)? {
        Some(state) => state,
        None => {
            let mut state = SessionState::new(
                &session_id,
                payload.agent_type(),
                &head,
                repo.workdir(),
                repo.worktree_id(),
            );
            state.untracked_files_at_start = repo
                .untracked_files()?
                .into_iter()
                .filter(|p| !is_protected_path(p))
                .collect();
            if let Some(ref path) = payload.transcript_path {
                state.transcript_path = Some(path.clone());
                if let Ok(content) = fs::read_to_string(path) {
                    state.transcript_lines_at_start = count_items(state.agent_type, &content);
                }
                state.transcript_identifier_at_start =
                    last_identifier(state.agent_type, path);
            }
            state
        }
    };

    // Recoverable empty base, or a pull/rebase moved HEAD: migrate the
    // shadow branch before anything writes to it.
    if state.base_commit.is_empty() {
        state.base_commit = head.clone();
    } else if state.base_commit != head {
        match rename_for_new_base(repo, &state.base_commit, &head, &state.worktree_id) {
            Ok(true) => {
                state.base_commit = head.clone();
                state.stale = false;
            }
            Ok(false) | Err(_) => {
                if !state.stale {
                    eprintln!(
                        "warning: entire session {} is out of date with HEAD; checkpoints may be incomplete",
                        state.session_id
                    );
                }
                state.stale = true;
            }
        }
    }

    let (phase, actions) = transition(state.phase, Event::TurnStart);
    state.phase = phase;

    for action in actions {
        if action != Action::BeginTurn {
            continue;
        }
        state.last_interaction_at = Some(Utc::now());
        state.turn_id = Some(uuid::Uuid::new_v4().to_string());
        state.last_checkpoint_id = None;
        state.turn_checkpoint_ids.clear();

        let transcript_content = state
            .transcript_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_default();
        state.turn_transcript_start = count_items(state.agent_type, &transcript_content);

        if state.first_prompt.is_none()
            && let Some(ref prompt) = payload.prompt
        {
            state.first_prompt = Some(truncate_chars(prompt, 500));
        }

        // Prompt-start snapshot: the user's edits since the last save.
        let changed: BTreeSet<String> = repo
            .status_entries()?
            .into_iter()
            .map(|e| e.path)
            .filter(|p| !is_protected_path(p))
            .collect();
        let worktree = worktree_files_for_paths(repo, &changed);
        let worktree_changed: Vec<(String, String)> = changed
            .iter()
            .map(|p| (p.clone(), worktree.get(p).cloned().unwrap_or_default()))
            .collect();

        let shadow_branch = shadow_branch_name(&state.base_commit, &state.worktree_id);
        let shadow_tip = repo.branch_tip(&shadow_branch);
        let base_files = tree_files_for_paths(repo, &state.base_commit, &changed);
        let shadow_files = shadow_tip
            .as_deref()
            .map(|tip| tree_files_for_paths(repo, tip, &changed));

        let checkpoint_number = state.step_count + 1;
        state.pending_prompt_attribution = Some(calculate_prompt_attribution(
            checkpoint_number,
            &base_files,
            shadow_files.as_ref(),
            &worktree_changed,
        ));

        // Short-lived pre-prompt state for collaborators.
        let pre_prompt = repo.workdir().join(pre_prompt_path(&state.session_id));
        let _ = write_atomic(
            &pre_prompt,
            serde_json::to_string(&json!({
                "session_id": state.session_id,
                "base_commit": state.base_commit,
                "turn_id": state.turn_id,
                "recorded_at": Utc::now().to_rfc3339(),
            }))?
            .as_bytes(),
        );
        if let Some(ref tool_use_id) = payload.tool_use_id {
            let pre_task = repo.workdir().join(pre_task_path(tool_use_id));
            let _ = write_atomic(
                &pre_task,
                serde_json::to_string(&json!({
                    "session_id": state.session_id,
                    "tool_use_id": tool_use_id,
                }))?
                .as_bytes(),
            );
        }
    }

    store.save(&state)?;
    SessionLogger::new(repo.workdir(), &state.session_id).info(
        "turn_start",
        json!({"turn_id": state.turn_id, "base_commit": state.base_commit}),
    );
    Ok(())
}

/// Save changes: snapshot the agent's touched files onto the shadow branch
/// and fold the pending prompt attribution into the session.
pub fn save_changes(repo: &Repository, payload: &AgentHookPayload) -> Result<(), EntireError> {
    let session_id = qualified_session_id(&payload.session_id);
    let store = SessionStore::new(repo.common_dir());
    let Some(mut state) = store.load(&session_id)? else {
        debug_log("save-changes for unknown session; ignoring");
        return Ok(());
    };
    if state.base_commit.is_empty() {
        // Recoverable: re-initialize against the current HEAD.
        state.base_commit = repo.head_commit()?;
    }
    if let Some(ref path) = payload.transcript_path {
        state.transcript_path = Some(path.clone());
    }

    let (phase, actions) = transition(state.phase, Event::SaveChanges);
    state.phase = phase;

    for action in actions {
        if action != Action::WriteShadow {
            continue;
        }

        let transcript_content = state
            .transcript_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_default();
        let modified = extract_modified_files(
            state.agent_type,
            &transcript_content,
            state.checkpoint_transcript_start,
            repo.workdir(),
        );
        if modified.is_empty() {
            continue;
        }

        let (existing, deleted): (Vec<String>, Vec<String>) = modified
            .into_iter()
            .partition(|p| repo.workdir().join(p).exists());

        refresh_metadata_dir(repo, &state, &transcript_content)?;

        let result = write_temporary(
            repo,
            &WriteTemporaryOptions {
                base_commit: &state.base_commit,
                worktree_id: &state.worktree_id,
                modified_files: &existing,
                deleted_files: &deleted,
                metadata_dir: Some(&metadata_dir(&state.session_id)),
                message: &format!("entire: snapshot for {}", state.session_id),
            },
        )?;

        for path in existing.iter().chain(deleted.iter()) {
            state.files_touched.insert(path.clone());
        }
        if !result.skipped {
            state.step_count += 1;
        }
        if let Some(pending) = state.pending_prompt_attribution.take() {
            state.prompt_attributions.push(pending);
        }
        state.last_interaction_at = Some(Utc::now());
    }

    store.save(&state)?;
    Ok(())
}

/// Keep the in-worktree metadata dir current so shadow snapshots carry the
/// live transcript and prompts.
fn refresh_metadata_dir(
    repo: &Repository,
    state: &SessionState,
    transcript_content: &str,
) -> Result<(), EntireError> {
    let dir = repo.workdir().join(metadata_dir(&state.session_id));
    fs::create_dir_all(&dir)?;

    let slice = slice_from_offset(
        state.agent_type,
        transcript_content,
        state.checkpoint_transcript_start,
    );
    write_atomic(&dir.join("transcript"), slice.as_bytes())?;

    let prompts = extract_user_prompts(state.agent_type, &slice);
    write_atomic(&dir.join("prompt.txt"), prompts.join("\n\n---\n\n").as_bytes())?;

    let context_path = dir.join("context.md");
    if !context_path.exists() {
        write_atomic(&context_path, b"")?;
    }
    Ok(())
}

/// Turn end: finalize the turn's provisional checkpoints with the full turn
/// transcript and go idle.
pub fn turn_end(repo: &Repository, payload: &AgentHookPayload) -> Result<(), EntireError> {
    let session_id = qualified_session_id(&payload.session_id);
    let store = SessionStore::new(repo.common_dir());
    let Some(mut state) = store.load(&session_id)? else {
        return Ok(());
    };

    let (phase, actions) = transition(state.phase, Event::TurnEnd);
    state.phase = phase;

    for action in actions {
        if action != Action::FinalizeTurn {
            continue;
        }
        let transcript_content = state
            .transcript_path
            .as_ref()
            .and_then(|p| fs::read_to_string(p).ok())
            .unwrap_or_default();
        let full_turn = slice_from_offset(
            state.agent_type,
            &transcript_content,
            state.turn_transcript_start,
        );
        let prompts = extract_user_prompts(state.agent_type, &full_turn);
        let context = fs::read_to_string(
            repo.workdir()
                .join(metadata_dir(&state.session_id))
                .join("context.md"),
        )
        .unwrap_or_default();

        for id in state.turn_checkpoint_ids.clone() {
            if let Err(e) =
                update_committed(repo, &id, &state.session_id, &full_turn, &prompts, &context)
            {
                debug_log(&format!("could not finalize checkpoint {}: {}", id, e));
            }
        }
        state.turn_checkpoint_ids.clear();
        state.last_interaction_at = Some(Utc::now());

        // Pre-prompt state is only meaningful while the turn runs.
        let _ = fs::remove_file(repo.workdir().join(pre_prompt_path(&state.session_id)));
    }

    store.save(&state)?;
    Ok(())
}

/// Session end: record the explicit close.
pub fn session_end(repo: &Repository, payload: &AgentHookPayload) -> Result<(), EntireError> {
    let session_id = qualified_session_id(&payload.session_id);
    let store = SessionStore::new(repo.common_dir());
    let Some(mut state) = store.load(&session_id)? else {
        return Ok(());
    };

    let (phase, actions) = transition(state.phase, Event::SessionEnd);
    state.phase = phase;

    for action in actions {
        if action == Action::MarkEnded {
            state.ended_at = Some(Utc::now());
        }
    }

    store.save(&state)?;
    SessionLogger::new(repo.workdir(), &state.session_id)
        .info("session_end", json!({"ended_at": state.ended_at}));
    Ok(())
}
