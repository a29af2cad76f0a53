use crate::checkpoint::store::{CHECKPOINTS_BRANCH, CHECKPOINTS_REF};
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::utils::debug_log;

/// The `pre-push` contract: mirror the checkpoint branch to the remote the
/// user is pushing to. A failed mirror push is warned about and never blocks
/// the user's push.
pub fn run(repo: &Repository, remote: Option<&str>) -> Result<(), EntireError> {
    if repo.branch_tip(CHECKPOINTS_BRANCH).is_none() {
        return Ok(());
    }

    let remotes = match remote {
        Some(name) => vec![name.to_string()],
        None => repo.remotes()?,
    };

    let refspec = format!("{}:{}", CHECKPOINTS_REF, CHECKPOINTS_REF);
    for remote in remotes {
        if let Err(e) = repo.push_ref(&remote, &refspec) {
            eprintln!(
                "warning: could not push {} to {}: {}",
                CHECKPOINTS_BRANCH, remote, e
            );
            debug_log(&format!("pre-push mirror failed: {}", e));
        }
    }
    Ok(())
}
