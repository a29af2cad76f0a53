use chrono::Utc;
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::debug_log;

/// Structured per-session log: one JSON object per line under
/// `.entire/logs/<session-id>.log`. Hook handlers report failures here
/// instead of breaking the surrounding git operation.
pub struct SessionLogger {
    path: PathBuf,
}

impl SessionLogger {
    pub fn new(worktree_root: &Path, session_id: &str) -> SessionLogger {
        let path = worktree_root
            .join(".entire")
            .join("logs")
            .join(format!("{}.log", session_id));
        SessionLogger { path }
    }

    pub fn info(&self, event: &str, fields: serde_json::Value) {
        self.write("info", event, fields);
    }

    pub fn warn(&self, event: &str, fields: serde_json::Value) {
        self.write("warn", event, fields);
    }

    pub fn error(&self, event: &str, fields: serde_json::Value) {
        self.write("error", event, fields);
    }

    fn write(&self, level: &str, event: &str, fields: serde_json::Value) {
        let mut record = json!({
            "ts": Utc::now().to_rfc3339(),
            "level": level,
            "event": event,
        });
        if let (Some(obj), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }

        let line = format!("{}\n", record);
        if let Some(dir) = self.path.parent()
            && std::fs::create_dir_all(dir).is_err()
        {
            debug_log(&format!("failed to create log dir {}", dir.display()));
            return;
        }
        let appended = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if appended.is_err() {
            debug_log(&format!("failed to append session log {}", self.path.display()));
        }
    }
}
