use chrono::Utc;

use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::session::machine::{Action, Event, Phase, transition};
use crate::session::state::SessionStore;

/// `entire sessions list`
pub fn list() -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    let store = SessionStore::new(repo.common_dir());
    let sessions = store.for_worktree(repo.workdir())?;

    if sessions.is_empty() {
        println!("No sessions for this worktree.");
        return Ok(());
    }
    for state in sessions {
        let phase = match state.phase {
            Phase::Active => "active",
            Phase::Idle => "idle",
            Phase::Ended => "ended",
        };
        println!(
            "{}  {}  {}  {} file(s) touched",
            state.session_id,
            phase,
            state.agent_type.as_str(),
            state.files_touched.len(),
        );
    }
    Ok(())
}

/// `entire sessions end <session-id>` — the user explicitly closes a
/// session.
pub fn end(session_id: &str) -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    let store = SessionStore::new(repo.common_dir());
    let Some(mut state) = store.load(session_id)? else {
        return Err(EntireError::Generic(format!(
            "No session {}",
            session_id
        )));
    };

    let (phase, actions) = transition(state.phase, Event::SessionEnd);
    state.phase = phase;
    for action in actions {
        if action == Action::MarkEnded {
            state.ended_at = Some(Utc::now());
        }
    }
    store.save(&state)?;
    println!("Session {} ended.", session_id);
    Ok(())
}

/// Remove session state that is ENDED and fully condensed.
pub fn cleanup() -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    let store = SessionStore::new(repo.common_dir());

    let mut removed = 0usize;
    for state in store.for_worktree(repo.workdir())? {
        if state.phase == Phase::Ended && !state.has_recorded_work() {
            store.delete(&state.session_id)?;
            removed += 1;
        }
    }
    println!("Removed {} ended session(s).", removed);
    Ok(())
}
