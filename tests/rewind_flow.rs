mod repos;

use std::collections::BTreeMap;
use std::fs;

use entire::checkpoint::shadow::{
    WriteTemporaryOptions, shadow_branch_name, write_temporary,
};
use entire::checkpoint::trailers::extract_checkpoint_id;
use entire::commands::agent::{self, AgentHookPayload};
use entire::hooks::tty::FixedConfirm;
use entire::hooks::{post_commit, prepare_commit_msg};
use entire::rewind::{resolve_target, rewind, working_tree_report};
use entire::session::state::{SessionState, SessionStore};
use entire::transcript::AgentType;

use repos::test_repo::{TmpRepo, claude_transcript};

const SESSION_ID: &str = "2025-01-02-abc";

fn payload(tr: &TmpRepo) -> AgentHookPayload {
    AgentHookPayload {
        session_id: SESSION_ID.to_string(),
        agent: Some("claude-code".to_string()),
        transcript_path: Some(tr.aux_path("transcript.jsonl")),
        prompt: Some("work".to_string()),
        tool_use_id: None,
    }
}

/// Tracked files of the worktree (path -> content), for byte-identical
/// comparisons across rewinds.
fn worktree_snapshot(tr: &TmpRepo) -> BTreeMap<String, String> {
    let mut snapshot = BTreeMap::new();
    let listing = tr.git(&["ls-files"]);
    for path in listing.lines() {
        if let Some(content) = tr.read_file(path) {
            snapshot.insert(path.to_string(), content);
        }
    }
    snapshot
}

#[test]
fn rewind_by_checkpoint_id_resets_worktree() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "hello\n");
    tr.commit_all("init");
    let repo = tr.repo();

    fs::write(tr.aux_path("transcript.jsonl"), "").unwrap();
    agent::turn_start(&repo, &payload(&tr)).unwrap();
    tr.write_file("foo.go", "package main\n");
    let transcript = claude_transcript("work", &[&repo.workdir().join("foo.go")]);
    fs::write(tr.aux_path("transcript.jsonl"), transcript).unwrap();
    agent::save_changes(&repo, &payload(&tr)).unwrap();

    tr.git(&["add", "foo.go"]);
    let msg_path = tr.aux_path("MSG");
    fs::write(&msg_path, "add foo\n").unwrap();
    let confirm = FixedConfirm {
        tty: false,
        answer: true,
    };
    prepare_commit_msg::run(&repo, &msg_path, Some("message"), &confirm).unwrap();
    let checkpoint_commit = tr.commit_with_message_file(&msg_path);
    post_commit::run(&repo).unwrap();
    let id = extract_checkpoint_id(&tr.head_message()).unwrap();

    // More work lands after the checkpoint
    tr.write_file("foo.go", "package main\n\nfunc main() {}\n");
    tr.commit_all("more");
    assert_ne!(tr.head(), checkpoint_commit);

    // Rewinding by checkpoint id finds the trailer-carrying commit
    let target = resolve_target(&repo, id.as_str()).unwrap();
    assert_eq!(target, checkpoint_commit);

    rewind(&repo, &target, true).unwrap();
    assert_eq!(tr.head(), checkpoint_commit);
    assert_eq!(tr.read_file("foo.go").unwrap(), "package main\n");
}

#[test]
fn rewind_is_idempotent() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "v1\n");
    let first = tr.commit_all("init");
    tr.write_file("README.md", "v2\n");
    tr.write_file("extra.txt", "extra\n");
    tr.commit_all("second");
    let repo = tr.repo();

    rewind(&repo, &first, false).unwrap();
    let after_first = worktree_snapshot(&tr);

    rewind(&repo, &first, false).unwrap();
    let after_second = worktree_snapshot(&tr);

    assert_eq!(after_first, after_second);
    assert_eq!(tr.read_file("README.md").unwrap(), "v1\n");
    assert!(!tr.file_exists("extra.txt"));
}

#[test]
fn rewind_restores_untracked_files_from_shadow() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "hello\n");
    let base = tr.commit_all("init");
    let repo = tr.repo();

    // notes.txt is untracked when the session begins
    tr.write_file("notes.txt", "scratch notes\n");
    let mut state = SessionState::new(SESSION_ID, AgentType::ClaudeCode, &base, repo.workdir(), "");
    state.untracked_files_at_start.insert("notes.txt".to_string());
    let store = SessionStore::new(repo.common_dir());
    store.save(&state).unwrap();

    // The shadow snapshot captured it
    write_temporary(
        &repo,
        &WriteTemporaryOptions {
            base_commit: &base,
            worktree_id: "",
            modified_files: &["notes.txt".to_string()],
            deleted_files: &[],
            metadata_dir: None,
            message: "snapshot",
        },
    )
    .unwrap();
    assert!(repo.branch_tip(&shadow_branch_name(&base, "")).is_some());

    // The user later commits notes.txt, making it tracked
    tr.commit_all("track notes");

    // Rewinding to base removes the now-tracked file; the engine restores it
    // from the shadow because it was untracked when the session started.
    rewind(&repo, &base, false).unwrap();
    assert_eq!(tr.head(), base);
    assert_eq!(tr.read_file("notes.txt").unwrap(), "scratch notes\n");

    // And doing it again changes nothing
    rewind(&repo, &base, false).unwrap();
    assert_eq!(tr.read_file("notes.txt").unwrap(), "scratch notes\n");
}

#[test]
fn dirty_report_lists_uncommitted_changes() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "one\ntwo\n");
    tr.commit_all("init");
    let repo = tr.repo();

    tr.write_file("README.md", "one\nthree\nfour\n");
    tr.write_file("new.txt", "a\nb\n");

    let report = working_tree_report(&repo).unwrap();
    let readme = report.iter().find(|f| f.path == "README.md").unwrap();
    assert_eq!(readme.added, 2);
    assert_eq!(readme.removed, 1);

    let new_file = report.iter().find(|f| f.path == "new.txt").unwrap();
    assert_eq!(new_file.added, 2);
    assert_eq!(new_file.removed, 0);
}

#[test]
fn rewind_rejects_unknown_target() {
    let tr = TmpRepo::new();
    tr.write_file("README.md", "hello\n");
    tr.commit_all("init");
    let repo = tr.repo();

    assert!(resolve_target(&repo, "a1b2c3d4e5f6").is_err());
    assert!(rewind(&repo, "0000000000000000000000000000000000000000", false).is_err());
}
