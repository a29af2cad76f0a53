use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::attribution::InitialAttribution;
use crate::checkpoint::id::CheckpointId;
use crate::checkpoint::paths::checkpoint_dir;
use crate::checkpoint::store::{
    CheckpointSummary, list_committed, read_committed, read_session_file,
};
use crate::checkpoint::trailers::extract_checkpoint_id;
use crate::error::EntireError;
use crate::git::repository::Repository;

/// Default scan depth for rewind points that only exist as commit trailers.
pub const DEFAULT_REWIND_SCAN_LIMIT: usize = 50;

/// One row of `entire checkpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub checkpoint_id: CheckpointId,
    pub created_at: DateTime<Utc>,
    pub agent: String,
    pub session_ids: Vec<String>,
    pub files_touched: Vec<String>,
    pub is_task: bool,
}

/// A target the rewind engine accepts: a condensed checkpoint, or a recent
/// commit whose trailer names a checkpoint that has no condensed data yet
/// (`metadata_dir` empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindPoint {
    pub id: CheckpointId,
    pub commit: String,
    pub metadata_dir: String,
    pub is_task_checkpoint: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub files_touched: Vec<String>,
}

/// All condensed checkpoints, most recent first. Prompts are not read here;
/// callers fetch them lazily per checkpoint.
pub fn list_checkpoints(repo: &Repository) -> Result<Vec<CheckpointInfo>, EntireError> {
    Ok(list_committed(repo)?
        .into_iter()
        .map(|summary| CheckpointInfo {
            session_ids: summary
                .sessions
                .iter()
                .map(|s| s.session_id.clone())
                .collect(),
            checkpoint_id: summary.checkpoint_id,
            created_at: summary.created_at,
            agent: summary.agent,
            files_touched: summary.files_touched,
            is_task: summary.is_task,
        })
        .collect())
}

/// Rewind points: every trailer-carrying commit within the scan limit, with
/// condensed checkpoint data joined in where it exists.
pub fn get_rewind_points(
    repo: &Repository,
    limit: usize,
) -> Result<Vec<RewindPoint>, EntireError> {
    let mut points = Vec::new();

    for commit in repo.recent_commits(limit)? {
        let Ok(message) = repo.commit_message(&commit) else {
            continue;
        };
        let Some(id) = extract_checkpoint_id(&message) else {
            continue;
        };

        let created_at = repo
            .commit_time(&commit)
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        match read_committed(repo, &id)? {
            Some((summary, _)) => points.push(RewindPoint {
                metadata_dir: checkpoint_dir(&id),
                id,
                commit,
                is_task_checkpoint: summary.is_task,
                created_at: summary.created_at,
                summary: summary_line(&summary, repo),
                files_touched: summary.files_touched,
            }),
            // Logs-only: the trailer exists but condensation has not
            // happened (or failed); still a valid rewind target.
            None => points.push(RewindPoint {
                id,
                commit,
                metadata_dir: String::new(),
                is_task_checkpoint: false,
                created_at,
                summary: None,
                files_touched: Vec::new(),
            }),
        }
    }

    Ok(points)
}

fn summary_line(summary: &CheckpointSummary, repo: &Repository) -> Option<String> {
    let paths = summary.sessions.first()?;
    let data = read_session_file(repo, &paths.prompt)?;
    let text = String::from_utf8(data).ok()?;
    let first = text.split("\n\n---\n\n").next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(crate::utils::truncate_chars(first, 80))
    }
}

/// The stored transcript of a (checkpoint, session) pair.
pub fn read_transcript(
    repo: &Repository,
    id: &CheckpointId,
    session_id: &str,
) -> Result<Option<String>, EntireError> {
    read_slot_file(repo, id, session_id, |paths| paths.transcript.clone())
}

/// The stored prompts of a (checkpoint, session) pair.
pub fn read_prompts(
    repo: &Repository,
    id: &CheckpointId,
    session_id: &str,
) -> Result<Option<String>, EntireError> {
    read_slot_file(repo, id, session_id, |paths| paths.prompt.clone())
}

/// The stored summary of a (checkpoint, session) pair, if one was generated.
pub fn read_summary(
    repo: &Repository,
    id: &CheckpointId,
    session_id: &str,
) -> Result<Option<serde_json::Value>, EntireError> {
    let Some((_, sessions)) = read_committed(repo, id)? else {
        return Ok(None);
    };
    Ok(sessions
        .into_iter()
        .find(|s| s.session_id == session_id)
        .and_then(|s| s.summary))
}

/// The attribution recorded for a (checkpoint, session) pair.
pub fn read_attribution(
    repo: &Repository,
    id: &CheckpointId,
    session_id: &str,
) -> Result<Option<InitialAttribution>, EntireError> {
    let Some((_, sessions)) = read_committed(repo, id)? else {
        return Ok(None);
    };
    Ok(sessions
        .into_iter()
        .find(|s| s.session_id == session_id)
        .and_then(|s| s.initial_attribution))
}

fn read_slot_file(
    repo: &Repository,
    id: &CheckpointId,
    session_id: &str,
    pick: impl Fn(&crate::checkpoint::store::SessionFilePaths) -> String,
) -> Result<Option<String>, EntireError> {
    let Some((summary, _)) = read_committed(repo, id)? else {
        return Ok(None);
    };
    let Some(paths) = summary.sessions.iter().find(|s| s.session_id == session_id) else {
        return Ok(None);
    };
    let Some(data) = read_session_file(repo, &pick(paths)) else {
        return Ok(None);
    };
    Ok(Some(String::from_utf8_lossy(&data).to_string()))
}
