use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::attribution::InitialAttribution;
use crate::checkpoint::id::CheckpointId;
use crate::checkpoint::paths::{checkpoint_dir, session_dir};
use crate::checkpoint::trailers::format_commit_trailers;
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::git::tree::{TreeEntry, build_tree, flatten_tree};
use crate::secrets::redact_all;
use crate::transcript::{AgentType, TokenUsage};
use crate::utils::debug_log;

pub const CHECKPOINTS_BRANCH: &str = "entire/checkpoints/v1";
pub const CHECKPOINTS_REF: &str = "refs/heads/entire/checkpoints/v1";

const PROMPT_SEPARATOR: &str = "\n\n---\n\n";
const MAX_REF_RETRIES: u32 = 5;

/// Per-session file locations inside a checkpoint tree. Paths are absolute
/// within the tree (leading `/`); readers strip the slash before lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFilePaths {
    pub session_id: String,
    pub metadata: String,
    pub prompt: String,
    pub context: String,
    pub transcript: String,
}

/// On-disk summary at `<shard>/<rest>/metadata.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub checkpoint_id: CheckpointId,
    pub created_at: DateTime<Utc>,
    pub checkpoints_count: u32,
    pub files_touched: Vec<String>,
    pub agent: String,
    #[serde(default)]
    pub is_task: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    pub session_count: usize,
    pub sessions: Vec<SessionFilePaths>,
}

/// Per-session metadata inside a checkpoint's session slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommittedSessionMetadata {
    pub session_id: String,
    pub strategy: String,
    pub branch: String,
    pub agent: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_task: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_identifier_at_start: Option<String>,
    #[serde(default)]
    pub transcript_lines_at_start: usize,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_attribution: Option<InitialAttribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

pub struct WriteCommittedOptions<'a> {
    /// Elided id means "generate a fresh one".
    pub checkpoint_id: Option<CheckpointId>,
    pub session_id: &'a str,
    pub strategy: &'a str,
    pub branch: &'a str,
    pub transcript: &'a str,
    pub prompts: &'a [String],
    pub context: &'a str,
    pub files_touched: &'a [String],
    pub checkpoints_count: u32,
    pub shadow_branch: &'a str,
    pub agent: AgentType,
    pub transcript_lines_at_start: usize,
    pub transcript_identifier_at_start: Option<&'a str>,
    pub token_usage: TokenUsage,
    pub initial_attribution: Option<InitialAttribution>,
    pub summary: Option<serde_json::Value>,
    pub is_task: bool,
    pub tool_use_id: Option<&'a str>,
}

/// Make sure the orphan checkpoint branch exists; returns its tip.
pub fn ensure_checkpoint_branch(repo: &Repository) -> Result<String, EntireError> {
    if let Some(tip) = repo.branch_tip(CHECKPOINTS_BRANCH) {
        return Ok(tip);
    }
    let empty = build_tree(repo, &BTreeMap::new())?;
    match repo.commit(
        Some((CHECKPOINTS_REF, None)),
        "entire: initialize checkpoint store\n",
        &empty,
        &[],
    ) {
        Ok(commit) => Ok(commit),
        // Raced with another hook creating the branch
        Err(EntireError::RefUpdateConflict(_)) => repo
            .branch_tip(CHECKPOINTS_BRANCH)
            .ok_or_else(|| EntireError::BranchNotFound(CHECKPOINTS_BRANCH.to_string())),
        Err(e) => Err(e),
    }
}

/// Write a condensed checkpoint. At-most-once per (checkpoint id, session
/// id): an existing checkpoint directory keeps its earlier sessions and the
/// new session slot is appended (or overwritten for the same session).
pub fn write_committed(
    repo: &Repository,
    opts: &WriteCommittedOptions<'_>,
) -> Result<CheckpointId, EntireError> {
    let id = opts
        .checkpoint_id
        .clone()
        .unwrap_or_else(CheckpointId::generate);

    // Redaction comes first; nothing unredacted may reach the object store.
    let redacted = redact_all(opts.transcript, opts.prompts, opts.context)?;
    if redacted.redaction_count > 0 {
        debug_log(&format!(
            "redacted {} secrets before writing checkpoint {}",
            redacted.redaction_count, id
        ));
    }

    let dir = checkpoint_dir(&id);
    let sdir = session_dir(&id, opts.session_id);
    let created_at = Utc::now();

    let session_metadata = CommittedSessionMetadata {
        session_id: opts.session_id.to_string(),
        strategy: opts.strategy.to_string(),
        branch: opts.branch.to_string(),
        agent: opts.agent.as_str().to_string(),
        created_at,
        is_task: opts.is_task,
        tool_use_id: opts.tool_use_id.map(|s| s.to_string()),
        transcript_identifier_at_start: opts
            .transcript_identifier_at_start
            .map(|s| s.to_string()),
        transcript_lines_at_start: opts.transcript_lines_at_start,
        token_usage: opts.token_usage,
        initial_attribution: opts.initial_attribution.clone(),
        summary: opts.summary.clone(),
    };

    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    files.insert(
        format!("{}/metadata.json", sdir),
        serde_json::to_vec_pretty(&session_metadata)?,
    );
    files.insert(
        format!("{}/prompt.txt", sdir),
        redacted.prompts.join(PROMPT_SEPARATOR).into_bytes(),
    );
    files.insert(format!("{}/context.md", sdir), redacted.context.into_bytes());
    files.insert(format!("{}/transcript", sdir), redacted.transcript.into_bytes());
    if let Some(ref summary) = opts.summary {
        files.insert(
            format!("{}/summary.json", sdir),
            serde_json::to_vec_pretty(summary)?,
        );
    }

    let session_paths = SessionFilePaths {
        session_id: opts.session_id.to_string(),
        metadata: format!("/{}/metadata.json", sdir),
        prompt: format!("/{}/prompt.txt", sdir),
        context: format!("/{}/context.md", sdir),
        transcript: format!("/{}/transcript", sdir),
    };

    let message = format!(
        "entire: checkpoint {}\n\n{}",
        id,
        format_commit_trailers(&id, opts.session_id, opts.shadow_branch, &dir)
    );

    for attempt in 0..MAX_REF_RETRIES {
        let tip = ensure_checkpoint_branch(repo)?;
        let mut entries = flatten_tree(repo, &format!("{}^{{tree}}", tip))?;

        // Merge into any summary already present for this checkpoint id.
        let summary_path = format!("{}/metadata.json", dir);
        let merged_summary = match read_summary_at(repo, &tip, &id) {
            Some(mut existing) => {
                existing
                    .sessions
                    .retain(|s| s.session_id != opts.session_id);
                existing.sessions.push(session_paths.clone());
                existing.session_count = existing.sessions.len();
                for f in opts.files_touched {
                    if !existing.files_touched.contains(f) {
                        existing.files_touched.push(f.clone());
                    }
                }
                existing
            }
            None => CheckpointSummary {
                checkpoint_id: id.clone(),
                created_at,
                checkpoints_count: opts.checkpoints_count,
                files_touched: opts.files_touched.to_vec(),
                agent: opts.agent.as_str().to_string(),
                is_task: opts.is_task,
                tool_use_id: opts.tool_use_id.map(|s| s.to_string()),
                session_count: 1,
                sessions: vec![session_paths.clone()],
            },
        };

        for (path, content) in &files {
            let oid = repo.write_blob(content)?;
            entries.insert(path.clone(), TreeEntry { mode: "100644".to_string(), oid });
        }
        let summary_blob = repo.write_blob(&serde_json::to_vec_pretty(&merged_summary)?)?;
        entries.insert(
            summary_path,
            TreeEntry { mode: "100644".to_string(), oid: summary_blob },
        );

        let new_tree = build_tree(repo, &entries)?;
        match repo.commit(Some((CHECKPOINTS_REF, Some(&tip))), &message, &new_tree, &[&tip]) {
            Ok(_) => return Ok(id),
            Err(EntireError::RefUpdateConflict(_)) if attempt + 1 < MAX_REF_RETRIES => {
                debug_log("checkpoint branch moved, retrying write");
                std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
            }
            Err(e) => return Err(e),
        }
    }

    Err(EntireError::RefUpdateConflict(CHECKPOINTS_REF.to_string()))
}

/// Replace the provisional transcript, prompts, and context of an existing
/// (checkpoint, session) slot. Used at turn end once the full turn transcript
/// is known.
pub fn update_committed(
    repo: &Repository,
    id: &CheckpointId,
    session_id: &str,
    transcript: &str,
    prompts: &[String],
    context: &str,
) -> Result<(), EntireError> {
    let redacted = redact_all(transcript, prompts, context)?;
    let sdir = session_dir(id, session_id);

    let mut files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    files.insert(
        format!("{}/transcript", sdir),
        redacted.transcript.into_bytes(),
    );
    files.insert(
        format!("{}/prompt.txt", sdir),
        redacted.prompts.join(PROMPT_SEPARATOR).into_bytes(),
    );
    files.insert(format!("{}/context.md", sdir), redacted.context.into_bytes());

    let message = format!("entire: finalize checkpoint {}\n", id);

    for attempt in 0..MAX_REF_RETRIES {
        let tip = ensure_checkpoint_branch(repo)?;
        let mut entries = flatten_tree(repo, &format!("{}^{{tree}}", tip))?;

        if !entries.contains_key(&format!("{}/metadata.json", sdir)) {
            return Err(EntireError::Generic(format!(
                "No session slot {} in checkpoint {}",
                session_id, id
            )));
        }

        for (path, content) in &files {
            let oid = repo.write_blob(content)?;
            entries.insert(path.clone(), TreeEntry { mode: "100644".to_string(), oid });
        }

        let new_tree = build_tree(repo, &entries)?;
        match repo.commit(Some((CHECKPOINTS_REF, Some(&tip))), &message, &new_tree, &[&tip]) {
            Ok(_) => return Ok(()),
            Err(EntireError::RefUpdateConflict(_)) if attempt + 1 < MAX_REF_RETRIES => {
                std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
            }
            Err(e) => return Err(e),
        }
    }

    Err(EntireError::RefUpdateConflict(CHECKPOINTS_REF.to_string()))
}

fn read_summary_at(
    repo: &Repository,
    tip: &str,
    id: &CheckpointId,
) -> Option<CheckpointSummary> {
    let path = format!("{}/metadata.json", checkpoint_dir(id));
    let data = repo.file_in_tree(tip, &path)?;
    serde_json::from_slice(&data).ok()
}

/// Read one checkpoint's summary plus every session slot's metadata.
pub fn read_committed(
    repo: &Repository,
    id: &CheckpointId,
) -> Result<Option<(CheckpointSummary, Vec<CommittedSessionMetadata>)>, EntireError> {
    let Some(tip) = repo.branch_tip(CHECKPOINTS_BRANCH) else {
        return Ok(None);
    };
    let Some(summary) = read_summary_at(repo, &tip, id) else {
        return Ok(None);
    };

    let mut sessions = Vec::new();
    for paths in &summary.sessions {
        let rel = paths.metadata.trim_start_matches('/');
        let Some(data) = repo.file_in_tree(&tip, rel) else {
            continue;
        };
        match serde_json::from_slice::<CommittedSessionMetadata>(&data) {
            Ok(meta) => sessions.push(meta),
            Err(e) => debug_log(&format!(
                "skipping unreadable session metadata {}: {}",
                rel, e
            )),
        }
    }
    Ok(Some((summary, sessions)))
}

/// Read a file of a session slot (transcript, prompt.txt, context.md,
/// summary.json) by its path recorded in the checkpoint summary.
pub fn read_session_file(repo: &Repository, tree_path: &str) -> Option<Vec<u8>> {
    let tip = repo.branch_tip(CHECKPOINTS_BRANCH)?;
    repo.file_in_tree(&tip, tree_path.trim_start_matches('/'))
}

/// Walk the sharded layout and decode every checkpoint summary, most recent
/// first. One unparseable checkpoint never aborts the scan.
pub fn list_committed(repo: &Repository) -> Result<Vec<CheckpointSummary>, EntireError> {
    let Some(tip) = repo.branch_tip(CHECKPOINTS_BRANCH) else {
        return Ok(Vec::new());
    };
    let entries = flatten_tree(repo, &format!("{}^{{tree}}", tip))?;

    let mut summaries = Vec::new();
    for path in entries.keys() {
        let parts: Vec<&str> = path.split('/').collect();
        if parts.len() != 3 || parts[2] != "metadata.json" {
            continue;
        }
        if crate::checkpoint::paths::checkpoint_id_from_dir(parts[0], parts[1]).is_none() {
            continue;
        }
        let Some(data) = repo.file_in_tree(&tip, path) else {
            continue;
        };
        match serde_json::from_slice::<CheckpointSummary>(&data) {
            Ok(summary) => summaries.push(summary),
            Err(e) => debug_log(&format!("skipping unreadable checkpoint {}: {}", path, e)),
        }
    }

    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(summaries)
}
