use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use entire::git::repository::Repository;

// Create a guaranteed-unique temporary directory under the OS temp dir.
// Combines high-resolution time, process id, and an atomic counter, retrying
// on collisions.
fn create_unique_tmp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let base = std::env::temp_dir();

    for _attempt in 0..100u32 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = base.join(format!("{}-{}-{}-{}", prefix, now, pid, seq));
        match fs::create_dir(&path) {
            Ok(()) => return path,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => panic!("failed to create tmp dir: {}", e),
        }
    }
    panic!("failed to create a unique temporary directory");
}

/// A scratch git repository plus a sibling aux directory for transcripts and
/// message files that must stay outside the worktree.
pub struct TmpRepo {
    base: PathBuf,
    pub path: PathBuf,
    pub aux: PathBuf,
}

#[allow(dead_code)]
impl TmpRepo {
    pub fn new() -> TmpRepo {
        let base = create_unique_tmp_dir("entire-test");
        let path = base.join("repo");
        let aux = base.join("aux");
        fs::create_dir_all(&path).unwrap();
        fs::create_dir_all(&aux).unwrap();

        let repo = TmpRepo { base, path, aux };
        repo.git(&["init", "-b", "main"]);
        repo.git(&["config", "user.name", "Test User"]);
        repo.git(&["config", "user.email", "test@example.com"]);
        repo.git(&["config", "commit.gpgsign", "false"]);
        // Real repos keep the tool's state dir out of version control
        repo.write_file(".gitignore", ".entire/\n");
        repo
    }

    /// Run git in the repository, panicking on failure.
    pub fn git(&self, args: &[&str]) -> String {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.path)
            .args(args)
            .output()
            .expect("failed to spawn git");
        if !output.status.success() {
            panic!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    pub fn repo(&self) -> Repository {
        Repository::at(&self.path).expect("failed to open tmp repo")
    }

    pub fn write_file(&self, rel: &str, content: &str) {
        let path = self.path.join(rel);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read_file(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.path.join(rel)).ok()
    }

    pub fn file_exists(&self, rel: &str) -> bool {
        self.path.join(rel).exists()
    }

    pub fn commit_all(&self, message: &str) -> String {
        self.git(&["add", "-A"]);
        self.git(&["commit", "-m", message]);
        self.head()
    }

    /// Commit staged changes with an exact message file (hook simulations
    /// prepare the file first).
    pub fn commit_with_message_file(&self, msg_path: &Path) -> String {
        self.git(&["commit", "-F", msg_path.to_str().unwrap()]);
        self.head()
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }

    pub fn head_message(&self) -> String {
        self.git(&["log", "-1", "--format=%B"])
    }

    /// Path for an aux (outside-the-worktree) file.
    pub fn aux_path(&self, name: &str) -> PathBuf {
        self.aux.join(name)
    }
}

impl Drop for TmpRepo {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.base);
    }
}

/// Build a Claude-Code-style JSONL transcript: one user prompt followed by
/// an assistant turn whose tool calls write the given files.
#[allow(dead_code)]
pub fn claude_transcript(prompt: &str, written_files: &[&Path]) -> String {
    let mut lines = String::new();
    lines.push_str(&format!(
        "{}\n",
        serde_json::json!({
            "type": "user",
            "uuid": "u-prompt",
            "message": {"role": "user", "content": prompt},
        })
    ));

    let mut content = vec![serde_json::json!({"type": "text", "text": "working on it"})];
    for path in written_files {
        content.push(serde_json::json!({
            "type": "tool_use",
            "name": "Write",
            "input": {"file_path": path.to_string_lossy(), "content": ""},
        }));
    }
    lines.push_str(&format!(
        "{}\n",
        serde_json::json!({
            "type": "assistant",
            "uuid": "a-tools",
            "message": {
                "role": "assistant",
                "content": content,
                "usage": {"input_tokens": 10, "output_tokens": 5},
            },
        })
    ));
    lines
}
