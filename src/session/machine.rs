use serde::{Deserialize, Serialize};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// A prompt is in flight, from turn start until the agent stops.
    Active,
    /// The agent stopped; the session may resume with another prompt.
    Idle,
    /// The user or agent explicitly closed the session.
    Ended,
}

/// Events fed into the state machine by hook handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    TurnStart,
    TurnEnd,
    SaveChanges,
    GitCommit,
    SessionEnd,
    RebaseDetected,
}

/// Actions the caller must dispatch after a transition. The machine itself is
/// pure; all I/O lives with the hook orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Stamp last-interaction, mint a turn id, clear the previous turn's
    /// checkpoint ids, compute the prompt-start attribution.
    BeginTurn,
    /// Snapshot the worktree onto the shadow branch and append the pending
    /// prompt attribution.
    WriteShadow,
    /// Condense the shadow snapshot plus transcript into a committed
    /// checkpoint, then carry forward whatever the commit did not absorb.
    CondenseAndCarryForward,
    /// Condense only if the session still owns content overlapping the
    /// commit (idle sessions: path and content overlap both required).
    CondenseIfContentOverlaps,
    /// Condense if any files were touched, otherwise discard the session's
    /// leftover state.
    CondenseOrDiscard,
    /// Rewrite this turn's provisional checkpoint transcripts with the full
    /// turn transcript.
    FinalizeTurn,
    /// Record the explicit end of the session.
    MarkEnded,
}

/// The phase x event transition table. Unlisted combinations keep the phase
/// and emit no action; `RebaseDetected` in particular is always a no-op so
/// replayed commits never condense.
pub fn transition(phase: Phase, event: Event) -> (Phase, Vec<Action>) {
    use Action::*;
    use Event::*;
    use Phase::*;

    match (phase, event) {
        (Active, TurnStart) | (Idle, TurnStart) | (Ended, TurnStart) => {
            (Active, vec![BeginTurn])
        }
        (Active, SaveChanges) => (Active, vec![WriteShadow]),
        (Active, GitCommit) => (Active, vec![CondenseAndCarryForward]),
        (Active, TurnEnd) => (Idle, vec![FinalizeTurn]),
        (Idle, GitCommit) => (Idle, vec![CondenseIfContentOverlaps]),
        (Idle, SessionEnd) => (Ended, vec![MarkEnded]),
        (Ended, GitCommit) => (Ended, vec![CondenseOrDiscard]),
        (_, RebaseDetected) => (phase, vec![]),
        _ => (phase, vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_start_always_activates() {
        for phase in [Phase::Active, Phase::Idle, Phase::Ended] {
            let (next, actions) = transition(phase, Event::TurnStart);
            assert_eq!(next, Phase::Active);
            assert_eq!(actions, vec![Action::BeginTurn]);
        }
    }

    #[test]
    fn test_active_save_writes_shadow() {
        let (next, actions) = transition(Phase::Active, Event::SaveChanges);
        assert_eq!(next, Phase::Active);
        assert_eq!(actions, vec![Action::WriteShadow]);
    }

    #[test]
    fn test_active_commit_condenses() {
        let (next, actions) = transition(Phase::Active, Event::GitCommit);
        assert_eq!(next, Phase::Active);
        assert_eq!(actions, vec![Action::CondenseAndCarryForward]);
    }

    #[test]
    fn test_turn_end_goes_idle_and_finalizes() {
        let (next, actions) = transition(Phase::Active, Event::TurnEnd);
        assert_eq!(next, Phase::Idle);
        assert_eq!(actions, vec![Action::FinalizeTurn]);
    }

    #[test]
    fn test_idle_commit_needs_overlap() {
        let (next, actions) = transition(Phase::Idle, Event::GitCommit);
        assert_eq!(next, Phase::Idle);
        assert_eq!(actions, vec![Action::CondenseIfContentOverlaps]);
    }

    #[test]
    fn test_session_end_from_idle() {
        let (next, actions) = transition(Phase::Idle, Event::SessionEnd);
        assert_eq!(next, Phase::Ended);
        assert_eq!(actions, vec![Action::MarkEnded]);
    }

    #[test]
    fn test_ended_commit_condenses_or_discards() {
        let (next, actions) = transition(Phase::Ended, Event::GitCommit);
        assert_eq!(next, Phase::Ended);
        assert_eq!(actions, vec![Action::CondenseOrDiscard]);
    }

    #[test]
    fn test_rebase_never_changes_anything() {
        for phase in [Phase::Active, Phase::Idle, Phase::Ended] {
            let (next, actions) = transition(phase, Event::RebaseDetected);
            assert_eq!(next, phase);
            assert!(actions.is_empty());
        }
    }

    #[test]
    fn test_trivial_cells_are_inert() {
        // Cells the table does not list keep the phase and emit nothing.
        for (phase, event) in [
            (Phase::Idle, Event::SaveChanges),
            (Phase::Idle, Event::TurnEnd),
            (Phase::Ended, Event::SaveChanges),
            (Phase::Ended, Event::TurnEnd),
            (Phase::Ended, Event::SessionEnd),
            (Phase::Active, Event::SessionEnd),
        ] {
            let (next, actions) = transition(phase, event);
            assert_eq!(next, phase);
            assert!(actions.is_empty());
        }
    }
}
