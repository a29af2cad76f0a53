mod repos;

use std::fs;

use entire::checkpoint::trailers::extract_checkpoint_id;
use entire::commands::agent::{self, AgentHookPayload};
use entire::hooks::tty::FixedConfirm;
use entire::hooks::{post_commit, prepare_commit_msg};
use entire::query::read_attribution;
use entire::session::state::SessionStore;

use repos::test_repo::{TmpRepo, claude_transcript};

const SESSION_ID: &str = "2025-01-02-abc";

fn payload(tr: &TmpRepo, prompt: &str) -> AgentHookPayload {
    AgentHookPayload {
        session_id: SESSION_ID.to_string(),
        agent: Some("claude-code".to_string()),
        transcript_path: Some(tr.aux_path("transcript.jsonl")),
        prompt: Some(prompt.to_string()),
        tool_use_id: None,
    }
}

/// One full agent turn: the prompt starts (snapshotting whatever the user
/// edited since the last save), the agent writes `foo.go`, and the changes
/// are saved to the shadow branch.
fn agent_turn(tr: &TmpRepo, prompt: &str, foo_content: &str) {
    let repo = tr.repo();
    agent::turn_start(&repo, &payload(tr, prompt)).unwrap();

    tr.write_file("foo.go", foo_content);
    let mut transcript = fs::read_to_string(tr.aux_path("transcript.jsonl")).unwrap_or_default();
    transcript.push_str(&claude_transcript(prompt, &[&repo.workdir().join("foo.go")]));
    fs::write(tr.aux_path("transcript.jsonl"), transcript).unwrap();

    agent::save_changes(&repo, &payload(tr, prompt)).unwrap();
}

fn commit_foo_via_hooks(tr: &TmpRepo, extra_paths: &[&str]) {
    let repo = tr.repo();
    tr.git(&["add", "foo.go"]);
    for path in extra_paths {
        tr.git(&["add", path]);
    }
    let msg_path = tr.aux_path("MSG");
    fs::write(&msg_path, "ship it\n").unwrap();
    let confirm = FixedConfirm {
        tty: false,
        answer: true,
    };
    prepare_commit_msg::run(&repo, &msg_path, Some("message"), &confirm).unwrap();
    tr.commit_with_message_file(&msg_path);
    post_commit::run(&repo).unwrap();
}

/// The user rewriting their own earlier additions must never shrink the
/// agent's share of the final commit.
#[test]
fn user_self_edits_between_prompts_keep_agent_share() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "hello\n");
    tr.commit_all("init");
    let repo = tr.repo();
    fs::write(tr.aux_path("transcript.jsonl"), "").unwrap();

    // Turn 1: agent writes three lines onto a clean tree
    agent_turn(&tr, "write the scaffold", "agent 1\nagent 2\nagent 3\n");

    // Between prompts the user appends two lines of their own
    tr.write_file("foo.go", "agent 1\nagent 2\nagent 3\nuser 1\nuser 2\n");

    // Turn 2: agent appends one more line (the snapshot absorbs the user's)
    agent_turn(
        &tr,
        "extend it",
        "agent 1\nagent 2\nagent 3\nuser 1\nuser 2\nagent 4\n",
    );

    // Between prompts the user rewrites their own two lines in place
    tr.write_file(
        "foo.go",
        "agent 1\nagent 2\nagent 3\nuser 1 reworded\nuser 2 reworded\nagent 4\n",
    );

    // Turn 3: agent appends a final line
    agent_turn(
        &tr,
        "finish it",
        "agent 1\nagent 2\nagent 3\nuser 1 reworded\nuser 2 reworded\nagent 4\nagent 5\n",
    );

    // Sanity: the prompt snapshots recorded the user's four gross additions
    let store = SessionStore::new(repo.common_dir());
    let state = store.load(SESSION_ID).unwrap().unwrap();
    let total_user_added: u64 = state
        .prompt_attributions
        .iter()
        .map(|pa| pa.user_lines_added)
        .sum();
    assert_eq!(total_user_added, 4);

    commit_foo_via_hooks(&tr, &[]);

    let id = extract_checkpoint_id(&tr.head_message()).unwrap();
    let attribution = read_attribution(&repo, &id, SESSION_ID).unwrap().unwrap();

    // Five agent lines survive; the self-edit shows up as modifications but
    // takes nothing away from the agent.
    assert_eq!(attribution.agent_lines, 5);
    assert_eq!(attribution.human_added, 2);
    assert_eq!(attribution.human_modified, 2);
    assert_eq!(attribution.total_committed, 7);
    assert!(attribution.agent_percentage > 70.0 && attribution.agent_percentage < 72.0);
}

/// Files the agent never touched count entirely toward the human.
#[test]
fn mixed_commit_splits_between_agent_and_user_files() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "hello\n");
    tr.commit_all("init");
    let repo = tr.repo();
    fs::write(tr.aux_path("transcript.jsonl"), "").unwrap();

    // Agent writes one line to foo.go
    agent_turn(&tr, "write foo", "agent line\n");

    // The user writes their own file and commits both together
    tr.write_file("docs.md", "user doc 1\nuser doc 2\n");
    commit_foo_via_hooks(&tr, &["docs.md"]);

    let id = extract_checkpoint_id(&tr.head_message()).unwrap();
    let attribution = read_attribution(&repo, &id, SESSION_ID).unwrap().unwrap();

    assert_eq!(attribution.agent_lines, 1);
    assert_eq!(attribution.human_added, 2);
    assert_eq!(attribution.total_committed, 3);
    let expected = 100.0 / 3.0;
    assert!((attribution.agent_percentage - expected).abs() < 0.1);
}
