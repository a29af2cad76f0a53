use std::path::Path;

use crate::git::repository::Repository;
use crate::hooks::tty::DevTty;
use crate::hooks::{commit_msg, post_commit, pre_push, prepare_commit_msg};
use crate::utils::debug_log;

/// Dispatch `entire hooks git <event> [args...]`. Every verb except
/// `commit-msg` is silent-on-failure: errors are logged and the exit code is
/// 0 so the surrounding git operation is never broken.
pub fn run(event: &str, args: &[String]) -> i32 {
    let repo = match Repository::discover() {
        Ok(repo) => repo,
        Err(e) => {
            // Not a repository (or HEAD unreadable): hooks no-op.
            debug_log(&format!("hook {} outside a repository: {}", event, e));
            return 0;
        }
    };
    crate::config::Settings::load_for_worktree(repo.workdir());

    match event {
        "prepare-commit-msg" => {
            let Some(msg_file) = args.first() else {
                return 0;
            };
            let source = args.get(1).map(|s| s.as_str());
            if let Err(e) =
                prepare_commit_msg::run(&repo, Path::new(msg_file), source, &DevTty)
            {
                debug_log(&format!("prepare-commit-msg failed: {}", e));
            }
            0
        }
        "commit-msg" => {
            let Some(msg_file) = args.first() else {
                return 0;
            };
            match commit_msg::run(Path::new(msg_file)) {
                Ok(code) => code,
                Err(e) => {
                    debug_log(&format!("commit-msg failed: {}", e));
                    0
                }
            }
        }
        "post-commit" => {
            if let Err(e) = post_commit::run(&repo) {
                debug_log(&format!("post-commit failed: {}", e));
            }
            0
        }
        "pre-push" => {
            let remote = args.first().map(|s| s.as_str());
            if let Err(e) = pre_push::run(&repo, remote) {
                debug_log(&format!("pre-push failed: {}", e));
            }
            0
        }
        other => {
            debug_log(&format!("unknown hook event {}", other));
            0
        }
    }
}
