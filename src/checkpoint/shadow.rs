use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::attribution::TreeFiles;
use crate::checkpoint::paths::is_protected_path;
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::git::tree::{TreeEntry, build_tree, flatten_tree, is_binary};
use crate::utils::{debug_log, normalize_to_posix};

/// Number of CAS retries before a ref-update collision is surfaced.
const MAX_REF_RETRIES: u32 = 5;

/// Shadow branch for a (base commit, worktree) pair:
/// `entire/<short-base>` on the main worktree, `entire/<short-base>-<id>`
/// on linked worktrees. Deterministic, so sessions sharing the pair share
/// the branch.
pub fn shadow_branch_name(base_commit: &str, worktree_id: &str) -> String {
    let short = &base_commit[..base_commit.len().min(7)];
    if worktree_id.is_empty() {
        format!("entire/{}", short)
    } else {
        format!("entire/{}-{}", short, worktree_id)
    }
}

pub fn shadow_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

pub struct WriteTemporaryOptions<'a> {
    pub base_commit: &'a str,
    pub worktree_id: &'a str,
    /// Worktree-relative paths that were modified or created.
    pub modified_files: &'a [String],
    /// Worktree-relative paths that were deleted.
    pub deleted_files: &'a [String],
    /// Repo-relative metadata dir (transcript, prompt, context files) to copy
    /// into the snapshot at its original path.
    pub metadata_dir: Option<&'a str>,
    pub message: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteTemporaryResult {
    /// True when the snapshot was identical to the shadow tip and nothing
    /// was written.
    pub skipped: bool,
    pub commit: Option<String>,
}

/// Snapshot worktree content onto the shadow branch. Content comes from the
/// worktree, never the index. Binary files are stored as-is; line counting
/// ignores them later. Atomic at the ref level: a lost CAS race re-reads the
/// tip and replays the changes.
pub fn write_temporary(
    repo: &Repository,
    opts: &WriteTemporaryOptions<'_>,
) -> Result<WriteTemporaryResult, EntireError> {
    let branch = shadow_branch_name(opts.base_commit, opts.worktree_id);
    let refname = shadow_ref(&branch);

    // Resolve worktree content once; blobs are reused across retries.
    let mut upserts: BTreeMap<String, TreeEntry> = BTreeMap::new();
    for path in opts.modified_files {
        let rel = normalize_to_posix(path);
        if is_protected_path(&rel) {
            continue;
        }
        let abs = repo.workdir().join(&rel);
        let Ok(data) = std::fs::read(&abs) else {
            // Raced with a delete; the deleted list will cover it next save
            continue;
        };
        let oid = repo.write_blob(&data)?;
        upserts.insert(rel, TreeEntry { mode: file_mode(&abs), oid });
    }
    if let Some(metadata_dir) = opts.metadata_dir {
        collect_dir_blobs(repo, metadata_dir, &mut upserts)?;
    }

    let deletes: Vec<String> = opts
        .deleted_files
        .iter()
        .map(|p| normalize_to_posix(p))
        .filter(|p| !is_protected_path(p))
        .collect();

    for attempt in 0..MAX_REF_RETRIES {
        let tip = repo.branch_tip(&branch);
        let start_point = tip.as_deref().unwrap_or(opts.base_commit);

        let mut entries = flatten_tree(repo, &format!("{}^{{tree}}", start_point))?;
        for (path, entry) in &upserts {
            entries.insert(path.clone(), entry.clone());
        }
        for path in &deletes {
            entries.remove(path);
        }

        let new_tree = build_tree(repo, &entries)?;
        if let Some(ref tip_commit) = tip {
            let tip_tree = repo.tree_of_commit(tip_commit)?;
            if tip_tree == new_tree {
                return Ok(WriteTemporaryResult {
                    skipped: true,
                    commit: None,
                });
            }
        }

        let parent = start_point.to_string();
        match repo.commit(
            Some((&refname, tip.as_deref())),
            opts.message,
            &new_tree,
            &[&parent],
        ) {
            Ok(commit) => {
                return Ok(WriteTemporaryResult {
                    skipped: false,
                    commit: Some(commit),
                });
            }
            Err(EntireError::RefUpdateConflict(_)) if attempt + 1 < MAX_REF_RETRIES => {
                debug_log(&format!("shadow ref {} moved, retrying", refname));
                std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
            }
            Err(e) => return Err(e),
        }
    }

    Err(EntireError::RefUpdateConflict(refname))
}

fn file_mode(path: &Path) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = std::fs::metadata(path)
            && meta.permissions().mode() & 0o111 != 0
        {
            return "100755".to_string();
        }
    }
    let _ = path;
    "100644".to_string()
}

/// Add every file under a repo-relative directory to the upsert set, at its
/// original path.
fn collect_dir_blobs(
    repo: &Repository,
    rel_dir: &str,
    upserts: &mut BTreeMap<String, TreeEntry>,
) -> Result<(), EntireError> {
    let abs_dir = repo.workdir().join(rel_dir);
    if !abs_dir.is_dir() {
        return Ok(());
    }
    let mut stack = vec![abs_dir];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(rel) = path.strip_prefix(repo.workdir()) {
                let data = std::fs::read(&path)?;
                let oid = repo.write_blob(&data)?;
                upserts.insert(
                    normalize_to_posix(&rel.to_string_lossy()),
                    TreeEntry { mode: "100644".to_string(), oid },
                );
            }
        }
    }
    Ok(())
}

/// Delete a shadow branch, treating "already gone" as success.
pub fn delete_shadow(repo: &Repository, branch: &str) -> Result<(), EntireError> {
    match repo.delete_branch(branch) {
        Ok(()) | Err(EntireError::BranchNotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Migrate a shadow branch after the base commit moved under the session
/// (pull, rebase): the branch is renamed to the new base's name. Returns
/// false when the rename could not be performed and the session should be
/// marked stale.
pub fn rename_for_new_base(
    repo: &Repository,
    old_base: &str,
    new_base: &str,
    worktree_id: &str,
) -> Result<bool, EntireError> {
    let old_branch = shadow_branch_name(old_base, worktree_id);
    let new_branch = shadow_branch_name(new_base, worktree_id);
    if old_branch == new_branch {
        return Ok(true);
    }

    let Some(tip) = repo.branch_tip(&old_branch) else {
        // Nothing to migrate
        return Ok(true);
    };
    if repo.branch_tip(&new_branch).is_some() {
        return Ok(false);
    }
    repo.update_ref_cas(&shadow_ref(&new_branch), &tip, None)?;
    delete_shadow(repo, &old_branch)?;
    Ok(true)
}

/// Text content of specific paths inside a tree-ish. Binary blobs and absent
/// paths are omitted, which is exactly what the attribution engine expects.
pub fn tree_files_for_paths(
    repo: &Repository,
    tree_ish: &str,
    paths: &BTreeSet<String>,
) -> TreeFiles {
    let mut files = TreeFiles::new();
    for path in paths {
        let Some(data) = repo.file_in_tree(tree_ish, path) else {
            continue;
        };
        if is_binary(&data) {
            continue;
        }
        if let Ok(text) = String::from_utf8(data) {
            files.insert(path.clone(), text);
        }
    }
    files
}

/// Current worktree content for specific paths; deleted files read as absent.
pub fn worktree_files_for_paths(repo: &Repository, paths: &BTreeSet<String>) -> TreeFiles {
    let mut files = TreeFiles::new();
    for path in paths {
        let abs = repo.workdir().join(path);
        let Ok(data) = std::fs::read(&abs) else {
            continue;
        };
        if is_binary(&data) {
            continue;
        }
        if let Ok(text) = String::from_utf8(data) {
            files.insert(path.clone(), text);
        }
    }
    files
}

/// Outcome of the post-condensation carry-forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CarryForward {
    /// Files whose agent-authored content the commit did not fully absorb.
    pub remaining_files: Vec<String>,
    /// The fresh shadow branch at the new base, when anything remained.
    pub new_branch: Option<String>,
}

/// After condensation, compare what the user's commit absorbed against the
/// shadow snapshot, content-wise. Files with any remaining agent-authored
/// content are carried onto a fresh shadow branch at the new base.
pub fn carry_forward(
    repo: &Repository,
    files_touched: &BTreeSet<String>,
    old_shadow_commit: &str,
    new_base_commit: &str,
    worktree_id: &str,
) -> Result<CarryForward, EntireError> {
    let head_tree = repo.tree_of_commit(new_base_commit)?;
    let shadow_tree = repo.tree_of_commit(old_shadow_commit)?;

    let mut remaining: Vec<(String, Option<TreeEntry>)> = Vec::new();
    let shadow_entries = flatten_tree(repo, &shadow_tree)?;

    for path in files_touched {
        let in_shadow = shadow_entries.get(path);
        let in_head = repo.rev_parse_opt(&format!("{}:{}", head_tree, path));

        match (in_shadow, in_head) {
            // Absorbed: identical blob on both sides
            (Some(entry), Some(head_oid)) if entry.oid == head_oid => {}
            // Absorbed deletion: gone from both
            (None, None) => {}
            // Shadow still differs from the commit
            (Some(entry), _) => {
                remaining.push((path.clone(), Some(entry.clone())));
            }
            (None, Some(_)) => {
                // Agent deleted the file but the commit kept it
                remaining.push((path.clone(), None));
            }
        }
    }

    if remaining.is_empty() {
        return Ok(CarryForward {
            remaining_files: Vec::new(),
            new_branch: None,
        });
    }

    let new_branch = shadow_branch_name(new_base_commit, worktree_id);
    let refname = shadow_ref(&new_branch);

    for attempt in 0..MAX_REF_RETRIES {
        let tip = repo.branch_tip(&new_branch);
        let start_point = tip.as_deref().unwrap_or(new_base_commit);
        let mut entries = flatten_tree(repo, &format!("{}^{{tree}}", start_point))?;

        for (path, carried) in &remaining {
            match carried {
                Some(entry) => {
                    entries.insert(path.clone(), entry.clone());
                }
                None => {
                    entries.remove(path);
                }
            }
        }

        let new_tree = build_tree(repo, &entries)?;
        let parent = start_point.to_string();
        match repo.commit(
            Some((&refname, tip.as_deref())),
            "entire: carry forward",
            &new_tree,
            &[&parent],
        ) {
            Ok(_) => {
                return Ok(CarryForward {
                    remaining_files: remaining.iter().map(|(p, _)| p.clone()).collect(),
                    new_branch: Some(new_branch),
                });
            }
            Err(EntireError::RefUpdateConflict(_)) if attempt + 1 < MAX_REF_RETRIES => {
                std::thread::sleep(std::time::Duration::from_millis(10 << attempt));
            }
            Err(e) => return Err(e),
        }
    }

    Err(EntireError::RefUpdateConflict(refname))
}
