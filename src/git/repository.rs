use crate::config::Settings;
use crate::error::EntireError;
use crate::utils::{debug_log, normalize_to_posix};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

/// Handle to a git repository (regular or linked worktree). All git access
/// goes through the git executable; the operations the spec calls out as
/// unreliable in libraries (ref deletion with packed refs, `reset --hard`,
/// `rev-parse --git-dir/--git-common-dir/--show-toplevel`) have no other
/// implementation path here.
#[derive(Debug, Clone)]
pub struct Repository {
    global_args: Vec<String>,
    workdir: PathBuf,
    git_dir: PathBuf,
    common_dir: PathBuf,
    worktree_id: String,
}

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    /// Two-character XY status code.
    pub code: String,
    /// Repo-relative posix path.
    pub path: String,
}

impl StatusEntry {
    pub fn is_untracked(&self) -> bool {
        self.code == "??"
    }

    pub fn is_deleted(&self) -> bool {
        self.code.contains('D')
    }
}

impl Repository {
    /// Discover the repository containing the current directory.
    pub fn discover() -> Result<Repository, EntireError> {
        let cwd = std::env::current_dir()?;
        Repository::at(&cwd)
    }

    /// Discover the repository containing `path`.
    pub fn at(path: &Path) -> Result<Repository, EntireError> {
        let base = path.to_path_buf();
        let args = vec![
            "-C".to_string(),
            base.to_string_lossy().to_string(),
            "rev-parse".to_string(),
            "--show-toplevel".to_string(),
            "--absolute-git-dir".to_string(),
            "--git-common-dir".to_string(),
        ];
        let output = exec_git(&args)?;
        let stdout = String::from_utf8(output.stdout)?;
        let mut lines = stdout.lines();

        let workdir = PathBuf::from(
            lines
                .next()
                .ok_or_else(|| EntireError::Generic("rev-parse returned no toplevel".to_string()))?
                .trim(),
        );
        let git_dir = PathBuf::from(
            lines
                .next()
                .ok_or_else(|| EntireError::Generic("rev-parse returned no git dir".to_string()))?
                .trim(),
        );
        let common_dir_raw = lines
            .next()
            .ok_or_else(|| EntireError::Generic("rev-parse returned no common dir".to_string()))?
            .trim();
        // --git-common-dir may be relative to the command's cwd
        let common_dir = {
            let p = PathBuf::from(common_dir_raw);
            if p.is_absolute() { p } else { base.join(p) }
        };
        let common_dir = common_dir.canonicalize().unwrap_or(common_dir);
        let git_dir = git_dir.canonicalize().unwrap_or(git_dir);

        let worktree_id = worktree_id_from_git_dir(&git_dir, &common_dir);

        Ok(Repository {
            global_args: vec!["-C".to_string(), workdir.to_string_lossy().to_string()],
            workdir,
            git_dir,
            common_dir,
            worktree_id,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn common_dir(&self) -> &Path {
        &self.common_dir
    }

    /// Git's internal worktree name; empty for the main worktree.
    pub fn worktree_id(&self) -> &str {
        &self.worktree_id
    }

    pub fn global_args_for_exec(&self) -> Vec<String> {
        let mut args = self.global_args.clone();
        args.push("--no-pager".to_string());
        args
    }

    fn git(&self, tail: &[&str]) -> Result<Output, EntireError> {
        let mut args = self.global_args_for_exec();
        for a in tail {
            args.push(a.to_string());
        }
        exec_git(&args)
    }

    fn git_stdout(&self, tail: &[&str]) -> Result<String, EntireError> {
        let output = self.git(tail)?;
        Ok(String::from_utf8(output.stdout)?)
    }

    /* Object resolution */

    pub fn rev_parse(&self, spec: &str) -> Result<String, EntireError> {
        let out = self.git_stdout(&["rev-parse", "--verify", spec])?;
        Ok(out.trim().to_string())
    }

    pub fn rev_parse_opt(&self, spec: &str) -> Option<String> {
        self.rev_parse(spec).ok()
    }

    pub fn head_commit(&self) -> Result<String, EntireError> {
        self.rev_parse("HEAD")
    }

    pub fn commit_exists(&self, oid: &str) -> bool {
        self.rev_parse_opt(&format!("{}^{{commit}}", oid)).is_some()
    }

    /// Tree object id of a commit.
    pub fn tree_of_commit(&self, commit: &str) -> Result<String, EntireError> {
        self.rev_parse(&format!("{}^{{tree}}", commit))
    }

    pub fn commit_message(&self, commit: &str) -> Result<String, EntireError> {
        self.git_stdout(&["log", "-1", "--format=%B", commit])
    }

    /// Unix timestamp of a commit's committer date.
    pub fn commit_time(&self, commit: &str) -> Result<i64, EntireError> {
        let out = self.git_stdout(&["log", "-1", "--format=%ct", commit])?;
        out.trim()
            .parse::<i64>()
            .map_err(|_| EntireError::Generic(format!("Unparseable commit time for {}", commit)))
    }

    /* Blobs */

    pub fn write_blob(&self, data: &[u8]) -> Result<String, EntireError> {
        let mut args = self.global_args_for_exec();
        args.push("hash-object".to_string());
        args.push("-w".to_string());
        args.push("--stdin".to_string());
        let output = exec_git_stdin(&args, data)?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    pub fn blob_content(&self, oid: &str) -> Result<Vec<u8>, EntireError> {
        let output = self.git(&["cat-file", "blob", oid])?;
        Ok(output.stdout)
    }

    /// Content of `path` inside `tree_ish`, or None if the path is absent.
    pub fn file_in_tree(&self, tree_ish: &str, path: &str) -> Option<Vec<u8>> {
        let spec = format!("{}:{}", tree_ish, normalize_to_posix(path));
        let oid = self.rev_parse_opt(&spec)?;
        self.blob_content(&oid).ok()
    }

    /* Refs and branches */

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.git(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{}", branch),
        ])
        .is_ok()
    }

    pub fn branch_tip(&self, branch: &str) -> Option<String> {
        self.rev_parse_opt(&format!("refs/heads/{}", branch))
    }

    /// Name of the currently checked-out branch, if HEAD is not detached.
    pub fn current_branch(&self) -> Option<String> {
        let out = self.git_stdout(&["symbolic-ref", "--quiet", "--short", "HEAD"]).ok()?;
        let name = out.trim().to_string();
        if name.is_empty() { None } else { Some(name) }
    }

    /// Delete a local branch. Missing branches surface as the typed
    /// `BranchNotFound` so callers can treat the delete as idempotent.
    pub fn delete_branch(&self, branch: &str) -> Result<(), EntireError> {
        match self.git(&["branch", "-D", branch]) {
            Ok(_) => Ok(()),
            Err(EntireError::GitCliError { stderr, .. })
                if stderr.contains("not found") || stderr.contains("No such branch") =>
            {
                Err(EntireError::BranchNotFound(branch.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Compare-and-swap ref update. `old` of None means "must not exist yet".
    pub fn update_ref_cas(
        &self,
        refname: &str,
        new: &str,
        old: Option<&str>,
    ) -> Result<(), EntireError> {
        let old_value = old.unwrap_or(ZERO_OID).to_string();
        match self.git(&["update-ref", refname, new, &old_value]) {
            Ok(_) => Ok(()),
            Err(EntireError::GitCliError { stderr, .. })
                if stderr.contains("cannot lock ref")
                    || stderr.contains("is at")
                    || stderr.contains("but expected") =>
            {
                Err(EntireError::RefUpdateConflict(refname.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn delete_ref(&self, refname: &str) -> Result<(), EntireError> {
        self.git(&["update-ref", "-d", refname])?;
        Ok(())
    }

    /* Commits */

    /// Create a commit object via `commit-tree` and optionally CAS-update a
    /// ref to it. Identity comes from the repo's git config with environment
    /// fallbacks.
    pub fn commit(
        &self,
        update_ref: Option<(&str, Option<&str>)>,
        message: &str,
        tree: &str,
        parents: &[&str],
    ) -> Result<String, EntireError> {
        let (name, email) = self.identity();
        let env: Vec<(String, String)> = vec![
            ("GIT_AUTHOR_NAME".to_string(), name.clone()),
            ("GIT_AUTHOR_EMAIL".to_string(), email.clone()),
            ("GIT_COMMITTER_NAME".to_string(), name),
            ("GIT_COMMITTER_EMAIL".to_string(), email),
        ];

        let mut ct_args = self.global_args_for_exec();
        ct_args.push("commit-tree".to_string());
        ct_args.push(tree.to_string());
        for p in parents {
            ct_args.push("-p".to_string());
            ct_args.push(p.to_string());
        }
        let ct_out = exec_git_stdin_with_env(&ct_args, &env, message.as_bytes())?;
        let new_commit = String::from_utf8(ct_out.stdout)?.trim().to_string();

        if let Some((refname, old)) = update_ref {
            self.update_ref_cas(refname, &new_commit, old)?;
        }

        Ok(new_commit)
    }

    /// Author identity: git config, then GIT_AUTHOR_* environment, then a
    /// fixed fallback so hook paths never fail on an unconfigured machine.
    pub fn identity(&self) -> (String, String) {
        let name = self
            .config_get("user.name")
            .or_else(|| std::env::var("GIT_AUTHOR_NAME").ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "Entire".to_string());
        let email = self
            .config_get("user.email")
            .or_else(|| std::env::var("GIT_AUTHOR_EMAIL").ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "entire@localhost".to_string());
        (name, email)
    }

    pub fn config_get(&self, key: &str) -> Option<String> {
        let out = self.git(&["config", "--get", key]).ok()?;
        let value = String::from_utf8(out.stdout).ok()?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /* Worktree state */

    /// Entries of `git status --porcelain`, untracked files expanded.
    pub fn status_entries(&self) -> Result<Vec<StatusEntry>, EntireError> {
        let output = self.git(&[
            "status",
            "--porcelain",
            "--no-renames",
            "--untracked-files=all",
            "-z",
        ])?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();

        let mut entries = Vec::new();
        for item in stdout.split('\0') {
            if item.len() < 4 {
                continue;
            }
            let code = item[0..2].to_string();
            let path = normalize_to_posix(item[3..].trim_end());
            entries.push(StatusEntry { code, path });
        }
        Ok(entries)
    }

    pub fn untracked_files(&self) -> Result<Vec<String>, EntireError> {
        Ok(self
            .status_entries()?
            .into_iter()
            .filter(|e| e.is_untracked())
            .map(|e| e.path)
            .collect())
    }

    /// Paths staged for the next commit.
    pub fn staged_files(&self) -> Result<Vec<String>, EntireError> {
        let out = self.git_stdout(&["diff", "--cached", "--name-only", "--no-renames", "-z"])?;
        Ok(out
            .split('\0')
            .filter(|s| !s.is_empty())
            .map(normalize_to_posix)
            .collect())
    }

    /// Paths whose content differs between two tree-ish args.
    pub fn changed_files_between(&self, a: &str, b: &str) -> Result<Vec<String>, EntireError> {
        let out =
            self.git_stdout(&["diff-tree", "-r", "--no-renames", "--name-only", "-z", a, b])?;
        Ok(out
            .split('\0')
            .filter(|s| !s.is_empty())
            .map(normalize_to_posix)
            .collect())
    }

    /// Hard-reset the worktree to a commit. Runs the git executable so that
    /// untracked files under ignored directories are left alone.
    pub fn reset_hard(&self, commit: &str) -> Result<(), EntireError> {
        self.git(&["reset", "--hard", commit])?;
        Ok(())
    }

    /// Recent commit ids, newest first. An unborn HEAD yields an empty list.
    pub fn recent_commits(&self, limit: usize) -> Result<Vec<String>, EntireError> {
        let n = format!("-n{}", limit);
        let out = match self.git_stdout(&["log", &n, "--format=%H"]) {
            Ok(out) => out,
            Err(EntireError::GitCliError { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(out.lines().map(|l| l.trim().to_string()).collect())
    }

    /// True while a rebase, cherry-pick, or revert sequence is replaying
    /// commits in this worktree.
    pub fn sequence_operation_in_progress(&self) -> bool {
        self.git_dir.join("rebase-merge").exists()
            || self.git_dir.join("rebase-apply").exists()
            || self.git_dir.join("CHERRY_PICK_HEAD").exists()
            || self.git_dir.join("REVERT_HEAD").exists()
    }

    pub fn remotes(&self) -> Result<Vec<String>, EntireError> {
        let out = self.git_stdout(&["remote"])?;
        Ok(out
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    pub fn push_ref(&self, remote: &str, refspec: &str) -> Result<(), EntireError> {
        self.git(&["push", remote, refspec])?;
        Ok(())
    }
}

pub const ZERO_OID: &str = "0000000000000000000000000000000000000000";

fn worktree_id_from_git_dir(git_dir: &Path, common_dir: &Path) -> String {
    if git_dir == common_dir {
        return String::new();
    }
    // Linked worktrees live at <common>/worktrees/<name>
    if let Some(parent) = git_dir.parent()
        && parent.file_name().and_then(|n| n.to_str()) == Some("worktrees")
        && let Some(name) = git_dir.file_name().and_then(|n| n.to_str())
    {
        return name.to_string();
    }
    String::new()
}

/// Helper to execute a git command.
pub fn exec_git(args: &[String]) -> Result<Output, EntireError> {
    let mut cmd = Command::new(Settings::get().git_cmd().to_string());
    cmd.args(args);

    let output = cmd.output().map_err(EntireError::IoError)?;

    if !output.status.success() {
        let code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug_log(&format!("git {} failed: {}", args.join(" "), stderr.trim()));
        return Err(EntireError::GitCliError {
            code,
            stderr,
            args: args.to_vec(),
        });
    }

    Ok(output)
}

/// Helper to execute a git command with data provided on stdin.
pub fn exec_git_stdin(args: &[String], stdin_data: &[u8]) -> Result<Output, EntireError> {
    exec_git_stdin_with_env(args, &[], stdin_data)
}

/// Helper to execute a git command with stdin data and extra environment.
pub fn exec_git_stdin_with_env(
    args: &[String],
    env: &[(String, String)],
    stdin_data: &[u8],
) -> Result<Output, EntireError> {
    let mut cmd = Command::new(Settings::get().git_cmd().to_string());
    cmd.args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (k, v) in env.iter() {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn().map_err(EntireError::IoError)?;

    if let Some(mut stdin) = child.stdin.take() {
        use std::io::Write;
        if let Err(e) = stdin.write_all(stdin_data) {
            return Err(EntireError::IoError(e));
        }
    }

    let output = child.wait_with_output().map_err(EntireError::IoError)?;

    if !output.status.success() {
        let code = output.status.code();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(EntireError::GitCliError {
            code,
            stderr,
            args: args.to_vec(),
        });
    }

    Ok(output)
}
