use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::attribution::PromptAttribution;
use crate::checkpoint::id::CheckpointId;
use crate::checkpoint::paths::is_valid_session_id;
use crate::error::EntireError;
use crate::session::machine::Phase;
use crate::transcript::{AgentType, TokenUsage};
use crate::utils::{debug_log, write_atomic};

/// Directory under the git common dir holding one JSON file per session.
pub const SESSIONS_DIR: &str = "entire-sessions";

/// Persistent per-session record. Loaded and exclusively owned by one hook
/// handler at a time; `save` is the serialization point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Full object id of the commit HEAD pointed to when the session was
    /// initialized or last advanced. Empty means "just created, recoverable".
    #[serde(default)]
    pub base_commit: String,
    pub worktree_path: PathBuf,
    #[serde(default)]
    pub worktree_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub phase: Phase,
    #[serde(default)]
    pub step_count: u32,
    /// Transcript items already condensed into previous checkpoints.
    #[serde(default)]
    pub checkpoint_transcript_start: usize,
    #[serde(default)]
    pub untracked_files_at_start: BTreeSet<String>,
    #[serde(default)]
    pub files_touched: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<CheckpointId>,
    #[serde(default)]
    pub turn_checkpoint_ids: Vec<CheckpointId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
    #[serde(default)]
    pub transcript_lines_at_start: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_identifier_at_start: Option<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub prompt_attributions: Vec<PromptAttribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_prompt_attribution: Option<PromptAttribution>,
    pub agent_type: AgentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    /// Transcript item count at the start of the current turn; turn-end
    /// transcript rewrites slice from here.
    #[serde(default)]
    pub turn_transcript_start: usize,
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
    /// Set when a base-commit migration failed; warned on next interaction.
    #[serde(default)]
    pub stale: bool,
}

impl SessionState {
    pub fn new(
        session_id: &str,
        agent_type: AgentType,
        base_commit: &str,
        worktree_path: &Path,
        worktree_id: &str,
    ) -> SessionState {
        SessionState {
            session_id: session_id.to_string(),
            base_commit: base_commit.to_string(),
            worktree_path: worktree_path.to_path_buf(),
            worktree_id: worktree_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            phase: Phase::Active,
            step_count: 0,
            checkpoint_transcript_start: 0,
            untracked_files_at_start: BTreeSet::new(),
            files_touched: BTreeSet::new(),
            last_checkpoint_id: None,
            turn_checkpoint_ids: Vec::new(),
            transcript_path: None,
            transcript_lines_at_start: 0,
            transcript_identifier_at_start: None,
            token_usage: TokenUsage::default(),
            prompt_attributions: Vec::new(),
            pending_prompt_attribution: None,
            agent_type,
            first_prompt: None,
            turn_id: None,
            turn_transcript_start: 0,
            last_interaction_at: None,
            stale: false,
        }
    }

    /// Whether this session has any condensable content: shadow steps, files
    /// touched, or a pending prompt attribution.
    pub fn has_recorded_work(&self) -> bool {
        self.step_count > 0 || !self.files_touched.is_empty()
    }

    /// Clear per-checkpoint accumulators after a successful condensation.
    pub fn reset_after_condense(&mut self, new_base: &str, checkpoint_id: CheckpointId) {
        self.files_touched.clear();
        self.prompt_attributions.clear();
        self.pending_prompt_attribution = None;
        self.step_count = 0;
        self.last_checkpoint_id = Some(checkpoint_id);
        self.base_commit = new_base.to_string();
    }
}

/// Store of persisted session states, one JSON file per session under
/// `<git-common-dir>/entire-sessions/`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(git_common_dir: &Path) -> SessionStore {
        SessionStore {
            dir: git_common_dir.join(SESSIONS_DIR),
        }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, EntireError> {
        if !is_valid_session_id(session_id) {
            return Err(EntireError::Generic(format!(
                "Invalid session id: {:?}",
                session_id
            )));
        }
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SessionState>, EntireError> {
        let path = self.path_for(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // Corrupt state is logged and treated as absent; the next
                // mutation re-initializes from HEAD.
                debug_log(&format!("unparseable session state {}: {}", session_id, e));
                Ok(None)
            }
        }
    }

    pub fn save(&self, state: &SessionState) -> Result<(), EntireError> {
        let path = self.path_for(&state.session_id)?;
        let json = serde_json::to_string_pretty(state)?;
        write_atomic(&path, json.as_bytes())
    }

    pub fn delete(&self, session_id: &str) -> Result<(), EntireError> {
        let path = self.path_for(session_id)?;
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// Every parseable session state on disk.
    pub fn all(&self) -> Result<Vec<SessionState>, EntireError> {
        let mut states = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(states),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            if let Ok(state) = serde_json::from_str::<SessionState>(&content) {
                states.push(state);
            }
        }
        Ok(states)
    }

    /// Sessions bound to a specific worktree.
    pub fn for_worktree(&self, worktree_path: &Path) -> Result<Vec<SessionState>, EntireError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|s| s.worktree_path == worktree_path)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(session_id: &str, dir: &Path) -> SessionState {
        SessionState::new(
            session_id,
            AgentType::ClaudeCode,
            "0123456789abcdef0123456789abcdef01234567",
            dir,
            "",
        )
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let mut state = sample_state("2025-01-02-abc", tmp.path());
        state.files_touched.insert("src/main.rs".to_string());
        state.step_count = 3;

        store.save(&state).unwrap();
        let loaded = store.load("2025-01-02-abc").unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.base_commit, state.base_commit);
        assert_eq!(loaded.step_count, 3);
        assert!(loaded.files_touched.contains("src/main.rs"));
        assert_eq!(loaded.phase, Phase::Active);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(store.load("2025-01-02-missing").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_state_reads_as_absent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let dir = tmp.path().join(SESSIONS_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("2025-01-02-bad.json"), "{ not json").unwrap();
        assert!(store.load("2025-01-02-bad").unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_traversal_session_id() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        assert!(store.load("2025-01-02-../../etc/passwd").is_err());
        assert!(store.delete("no-date-prefix").is_err());
    }

    #[test]
    fn test_for_worktree_filters() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SessionStore::new(tmp.path());
        let here = sample_state("2025-01-02-here", tmp.path());
        let mut elsewhere = sample_state("2025-01-02-elsewhere", tmp.path());
        elsewhere.worktree_path = PathBuf::from("/somewhere/else");
        store.save(&here).unwrap();
        store.save(&elsewhere).unwrap();

        let found = store.for_worktree(tmp.path()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, "2025-01-02-here");
    }

    #[test]
    fn test_reset_after_condense() {
        let tmp = tempfile::tempdir().unwrap();
        let mut state = sample_state("2025-01-02-abc", tmp.path());
        state.files_touched.insert("a.rs".to_string());
        state.step_count = 2;
        state.prompt_attributions.push(PromptAttribution::default());

        let id: CheckpointId = "a1b2c3d4e5f6".parse().unwrap();
        state.reset_after_condense("fedcba9876543210fedcba9876543210fedcba98", id.clone());

        assert!(state.files_touched.is_empty());
        assert!(state.prompt_attributions.is_empty());
        assert_eq!(state.step_count, 0);
        assert_eq!(state.last_checkpoint_id, Some(id));
        assert_eq!(state.base_commit, "fedcba9876543210fedcba9876543210fedcba98");
    }
}
