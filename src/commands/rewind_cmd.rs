use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::hooks::tty::{Confirm, DevTty};
use crate::rewind::{resolve_target, rewind, working_tree_report};

/// `entire rewind <target> [--yes]`
pub fn run(target: &str, assume_yes: bool) -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    crate::config::Settings::load_for_worktree(repo.workdir());

    let commit = resolve_target(&repo, target)?;

    let dirty = working_tree_report(&repo)?;
    if !dirty.is_empty() {
        println!("Uncommitted changes that will be lost:");
        for file in &dirty {
            println!("  {} +{} -{}", file.path, file.added, file.removed);
        }
        if !assume_yes {
            let tty = DevTty;
            if !tty.confirm("Rewind anyway?", "", false) {
                return Err(EntireError::Generic("Rewind aborted".to_string()));
            }
        }
    }

    rewind(&repo, &commit, true)?;
    println!("Rewound working tree to {}", &commit[..commit.len().min(12)]);
    Ok(())
}
