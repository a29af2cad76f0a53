use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

use crate::utils::normalize_to_posix;

/// Supported coding agents. Each carries its own transcript dialect and the
/// config directory that must stay protected from rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentType {
    #[serde(rename = "claude-code")]
    ClaudeCode,
    #[serde(rename = "gemini-cli")]
    GeminiCli,
}

impl AgentType {
    pub fn all() -> &'static [AgentType] {
        &[AgentType::ClaudeCode, AgentType::GeminiCli]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "claude-code",
            AgentType::GeminiCli => "gemini-cli",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<AgentType> {
        match s {
            "claude-code" | "claude" => Some(AgentType::ClaudeCode),
            "gemini-cli" | "gemini" => Some(AgentType::GeminiCli),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => "Claude Code",
            AgentType::GeminiCli => "Gemini CLI",
        }
    }

    /// Repo-relative config dir the agent may keep in the worktree.
    pub fn config_dir(&self) -> &'static str {
        match self {
            AgentType::ClaudeCode => ".claude",
            AgentType::GeminiCli => ".gemini",
        }
    }

    fn native_format(&self) -> TranscriptFormat {
        match self {
            AgentType::ClaudeCode => TranscriptFormat::Jsonl,
            AgentType::GeminiCli => TranscriptFormat::JsonMessages,
        }
    }

    /// Tool names whose invocation modifies a file, and the input key naming
    /// the file.
    fn file_modifying_tools(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            AgentType::ClaudeCode => &[
                ("Write", "file_path"),
                ("Edit", "file_path"),
                ("MultiEdit", "file_path"),
                ("NotebookEdit", "notebook_path"),
            ],
            AgentType::GeminiCli => &[
                ("write_file", "file_path"),
                ("replace", "file_path"),
                ("edit", "file_path"),
            ],
        }
    }
}

/// Transcript container format: one JSON object per line, or a single JSON
/// object holding a `messages` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptFormat {
    Jsonl,
    JsonMessages,
}

/// Pick the format from the agent's native dialect, falling back to a content
/// sniff: a leading `{` that parses as an object with `messages` wins.
pub fn detect_format(agent: AgentType, content: &str) -> TranscriptFormat {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{')
        && let Ok(value) = serde_json::from_str::<Value>(trimmed)
        && value.get("messages").is_some()
    {
        return TranscriptFormat::JsonMessages;
    }
    if trimmed.is_empty() {
        return agent.native_format();
    }
    TranscriptFormat::Jsonl
}

/// Aggregated token counters across assistant turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
    pub output: u64,
    pub api_calls: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.cache_creation += other.cache_creation;
        self.cache_read += other.cache_read;
        self.output += other.output;
        self.api_calls += other.api_calls;
    }

    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

/// Transcript items as tolerant JSON values. Malformed entries are skipped,
/// never fatal; lines of arbitrary size are fine because the whole file is
/// read at once rather than through a fixed scanner buffer.
fn parse_items(agent: AgentType, content: &str) -> Vec<Value> {
    match detect_format(agent, content) {
        TranscriptFormat::Jsonl => content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect(),
        TranscriptFormat::JsonMessages => serde_json::from_str::<Value>(content)
            .ok()
            .and_then(|v| v.get("messages").cloned())
            .and_then(|m| m.as_array().cloned())
            .unwrap_or_default(),
    }
}

/// Count of transcript items: trimmed line count for JSONL, messages length
/// for array transcripts.
pub fn count_items(agent: AgentType, content: &str) -> usize {
    match detect_format(agent, content) {
        TranscriptFormat::Jsonl => content.lines().filter(|l| !l.trim().is_empty()).count(),
        TranscriptFormat::JsonMessages => serde_json::from_str::<Value>(content)
            .ok()
            .and_then(|v| v.get("messages").cloned())
            .and_then(|m| m.as_array().map(|a| a.len()))
            .unwrap_or(0),
    }
}

/// Identifier of the last transcript item, used to detect rotation: a new
/// file with a different tail means the agent started a fresh transcript.
pub fn last_identifier(agent: AgentType, path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let items = parse_items(agent, &content);
    let last = items.last()?;
    last.get("uuid")
        .or_else(|| last.get("id"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Drop the first `start` items. JSONL keeps the raw line bytes; array
/// transcripts are re-serialized as the sliced messages array.
pub fn slice_from_offset(agent: AgentType, content: &str, start: usize) -> String {
    match detect_format(agent, content) {
        TranscriptFormat::Jsonl => {
            let mut out = String::new();
            for line in content.lines().filter(|l| !l.trim().is_empty()).skip(start) {
                out.push_str(line);
                out.push('\n');
            }
            out
        }
        TranscriptFormat::JsonMessages => {
            let items = parse_items(agent, content);
            let sliced: Vec<&Value> = items.iter().skip(start).collect();
            serde_json::to_string(&sliced).unwrap_or_else(|_| "[]".to_string())
        }
    }
}

/// Scan tool-use records at or after `offset` for file-modifying tools and
/// return the touched paths, repo-relative. Paths outside the worktree and
/// relative paths that cannot be resolved are dropped.
pub fn extract_modified_files(
    agent: AgentType,
    content: &str,
    offset: usize,
    worktree_root: &Path,
) -> Vec<String> {
    let tools = agent.file_modifying_tools();
    let mut files = Vec::new();

    for item in parse_items(agent, content).iter().skip(offset) {
        for (name, input) in tool_uses(item) {
            let Some((_, path_key)) = tools.iter().find(|(tool, _)| *tool == name) else {
                continue;
            };
            let Some(raw) = input.get(*path_key).and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(rel) = resolve_repo_relative(raw, worktree_root)
                && !files.contains(&rel)
            {
                files.push(rel);
            }
        }
    }
    files
}

/// All (tool name, input) pairs inside one transcript item.
fn tool_uses(item: &Value) -> Vec<(&str, &Value)> {
    let mut found = Vec::new();

    // Claude Code: assistant message content blocks of type "tool_use"
    if let Some(blocks) = item
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    {
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("tool_use")
                && let (Some(name), Some(input)) = (
                    block.get("name").and_then(|n| n.as_str()),
                    block.get("input"),
                )
            {
                found.push((name, input));
            }
        }
    }

    // Gemini CLI: toolCalls array on the message itself
    if let Some(calls) = item.get("toolCalls").and_then(|c| c.as_array()) {
        for call in calls {
            if let Some(name) = call.get("name").and_then(|n| n.as_str()) {
                let input = call.get("args").or_else(|| call.get("input"));
                if let Some(input) = input {
                    found.push((name, input));
                }
            }
        }
    }

    found
}

fn resolve_repo_relative(raw: &str, worktree_root: &Path) -> Option<String> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path
            .strip_prefix(worktree_root)
            .ok()
            .map(|rel| normalize_to_posix(&rel.to_string_lossy()));
    }
    let normalized = normalize_to_posix(raw);
    if normalized.split('/').any(|c| c == "..") {
        return None;
    }
    Some(normalized)
}

static IDE_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(ide_opened_file|ide_selection|ide_diagnostics|system-reminder)>.*?</(ide_opened_file|ide_selection|ide_diagnostics|system-reminder)>").unwrap()
});

/// Preamble markers for injected (non-human) user messages.
const INJECTED_PROMPT_MARKERS: &[&str] = &["<command-name>", "<local-command-stdout>"];

/// Only the text the human actually typed: IDE context wrappers are stripped
/// and injected preambles (slash-command and skill content) are skipped.
pub fn extract_user_prompts(agent: AgentType, content: &str) -> Vec<String> {
    let mut prompts = Vec::new();

    for item in parse_items(agent, content) {
        if item.get("isMeta").and_then(|m| m.as_bool()) == Some(true) {
            continue;
        }
        let Some(text) = user_text(&item) else {
            continue;
        };
        if INJECTED_PROMPT_MARKERS
            .iter()
            .any(|m| text.trim_start().starts_with(m))
        {
            continue;
        }
        let cleaned = IDE_CONTEXT_RE.replace_all(&text, "").trim().to_string();
        if !cleaned.is_empty() {
            prompts.push(cleaned);
        }
    }

    prompts
}

/// The user-authored text of an item, if it is a user message.
fn user_text(item: &Value) -> Option<String> {
    let item_type = item
        .get("type")
        .or_else(|| item.get("role"))
        .and_then(|t| t.as_str())?;
    if item_type != "user" {
        return None;
    }

    // Claude Code nests the payload under "message"
    if let Some(message) = item.get("message") {
        match message.get("content") {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(Value::Array(blocks)) => {
                let text: Vec<&str> = blocks
                    .iter()
                    .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect();
                if text.is_empty() {
                    // Tool results arrive as user items; they are not prompts
                    return None;
                }
                return Some(text.join("\n"));
            }
            _ => return None,
        }
    }

    // Gemini CLI keeps text on the message
    item.get("content")
        .or_else(|| item.get("text"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
}

/// Sum token usage across assistant turns at or after `from_offset`.
pub fn token_usage(agent: AgentType, content: &str, from_offset: usize) -> TokenUsage {
    let mut total = TokenUsage::default();

    for item in parse_items(agent, content).iter().skip(from_offset) {
        let item_type = item
            .get("type")
            .or_else(|| item.get("role"))
            .and_then(|t| t.as_str())
            .unwrap_or_default();
        if item_type != "assistant" && item_type != "gemini" && item_type != "model" {
            continue;
        }

        // Claude Code: message.usage with *_tokens counters
        if let Some(usage) = item.get("message").and_then(|m| m.get("usage")) {
            total.add(&TokenUsage {
                input: u64_field(usage, "input_tokens"),
                cache_creation: u64_field(usage, "cache_creation_input_tokens"),
                cache_read: u64_field(usage, "cache_read_input_tokens"),
                output: u64_field(usage, "output_tokens"),
                api_calls: 1,
            });
            continue;
        }

        // Gemini CLI: tokens on the message
        if let Some(tokens) = item.get("tokens") {
            total.add(&TokenUsage {
                input: u64_field(tokens, "input"),
                cache_creation: 0,
                cache_read: u64_field(tokens, "cached"),
                output: u64_field(tokens, "output"),
                api_calls: 1,
            });
        }
    }

    total
}

fn u64_field(value: &Value, key: &str) -> u64 {
    value.get(key).and_then(|v| v.as_u64()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLAUDE_TRANSCRIPT: &str = r#"{"type":"user","uuid":"u1","message":{"role":"user","content":"add a hello function"}}
{"type":"assistant","uuid":"a1","message":{"role":"assistant","content":[{"type":"text","text":"ok"},{"type":"tool_use","name":"Write","input":{"file_path":"/work/repo/src/hello.rs","content":"fn hello() {}"}}],"usage":{"input_tokens":10,"cache_creation_input_tokens":5,"cache_read_input_tokens":2,"output_tokens":7}}}
{"type":"user","uuid":"u2","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"t1","content":"ok"}]}}
{"type":"user","uuid":"u3","message":{"role":"user","content":"<ide_opened_file>src/hello.rs</ide_opened_file>now add a test"}}
{"type":"assistant","uuid":"a2","message":{"role":"assistant","content":[{"type":"tool_use","name":"Edit","input":{"file_path":"relative/lib.rs"}}],"usage":{"input_tokens":4,"output_tokens":3}}}
"#;

    const GEMINI_TRANSCRIPT: &str = r#"{"sessionId":"s1","messages":[
        {"id":"m1","type":"user","content":"make a widget"},
        {"id":"m2","type":"gemini","content":"done","tokens":{"input":20,"output":9,"cached":4},"toolCalls":[{"name":"write_file","args":{"file_path":"widget.py"}}]},
        {"id":"m3","type":"user","content":"thanks"}
    ]}"#;

    #[test]
    fn test_detect_format() {
        assert_eq!(
            detect_format(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT),
            TranscriptFormat::Jsonl
        );
        assert_eq!(
            detect_format(AgentType::ClaudeCode, GEMINI_TRANSCRIPT),
            TranscriptFormat::JsonMessages
        );
        // Empty content falls back to the agent's native format
        assert_eq!(
            detect_format(AgentType::GeminiCli, ""),
            TranscriptFormat::JsonMessages
        );
    }

    #[test]
    fn test_count_items() {
        assert_eq!(count_items(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT), 5);
        assert_eq!(count_items(AgentType::GeminiCli, GEMINI_TRANSCRIPT), 3);
        assert_eq!(count_items(AgentType::ClaudeCode, "\n\n"), 0);
    }

    #[test]
    fn test_count_items_skips_blank_lines() {
        let content = "{\"type\":\"user\"}\n\n{\"type\":\"assistant\"}\n";
        assert_eq!(count_items(AgentType::ClaudeCode, content), 2);
    }

    #[test]
    fn test_slice_from_offset_jsonl() {
        let sliced = slice_from_offset(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT, 3);
        assert_eq!(sliced.lines().count(), 2);
        assert!(sliced.starts_with("{\"type\":\"user\",\"uuid\":\"u3\""));
    }

    #[test]
    fn test_slice_from_offset_messages() {
        let sliced = slice_from_offset(AgentType::GeminiCli, GEMINI_TRANSCRIPT, 2);
        let value: Value = serde_json::from_str(&sliced).unwrap();
        let arr = value.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["id"], "m3");
    }

    #[test]
    fn test_extract_modified_files() {
        let root = Path::new("/work/repo");
        let files = extract_modified_files(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT, 0, root);
        assert_eq!(files, vec!["src/hello.rs".to_string(), "relative/lib.rs".to_string()]);

        // Offset past the Write skips it
        let files = extract_modified_files(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT, 2, root);
        assert_eq!(files, vec!["relative/lib.rs".to_string()]);

        let files = extract_modified_files(AgentType::GeminiCli, GEMINI_TRANSCRIPT, 0, root);
        assert_eq!(files, vec!["widget.py".to_string()]);
    }

    #[test]
    fn test_extract_modified_files_drops_unresolvable() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Write","input":{"file_path":"../outside.rs"}},{"type":"tool_use","name":"Write","input":{"file_path":"/elsewhere/file.rs"}}]}}"#;
        let files = extract_modified_files(AgentType::ClaudeCode, line, 0, Path::new("/work/repo"));
        assert!(files.is_empty());
    }

    #[test]
    fn test_extract_user_prompts_strips_ide_context() {
        let prompts = extract_user_prompts(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT);
        assert_eq!(
            prompts,
            vec!["add a hello function".to_string(), "now add a test".to_string()]
        );
    }

    #[test]
    fn test_extract_user_prompts_skips_injected() {
        let content = r#"{"type":"user","message":{"role":"user","content":"<command-name>/status</command-name>"}}
{"type":"user","isMeta":true,"message":{"role":"user","content":"injected context"}}
{"type":"user","message":{"role":"user","content":"real question"}}
"#;
        let prompts = extract_user_prompts(AgentType::ClaudeCode, content);
        assert_eq!(prompts, vec!["real question".to_string()]);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let content = "not json\n{\"type\":\"user\",\"message\":{\"role\":\"user\",\"content\":\"hi\"}}\n{broken\n";
        let prompts = extract_user_prompts(AgentType::ClaudeCode, content);
        assert_eq!(prompts, vec!["hi".to_string()]);
    }

    #[test]
    fn test_token_usage() {
        let usage = token_usage(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT, 0);
        assert_eq!(usage.input, 14);
        assert_eq!(usage.cache_creation, 5);
        assert_eq!(usage.cache_read, 2);
        assert_eq!(usage.output, 10);
        assert_eq!(usage.api_calls, 2);

        // from_offset skips the first assistant turn
        let usage = token_usage(AgentType::ClaudeCode, CLAUDE_TRANSCRIPT, 2);
        assert_eq!(usage.input, 4);
        assert_eq!(usage.api_calls, 1);

        let usage = token_usage(AgentType::GeminiCli, GEMINI_TRANSCRIPT, 0);
        assert_eq!(usage.input, 20);
        assert_eq!(usage.cache_read, 4);
        assert_eq!(usage.output, 9);
    }

    #[test]
    fn test_last_identifier() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transcript.jsonl");
        std::fs::write(&path, CLAUDE_TRANSCRIPT).unwrap();
        assert_eq!(
            last_identifier(AgentType::ClaudeCode, &path).as_deref(),
            Some("a2")
        );

        let path = dir.path().join("gemini.json");
        std::fs::write(&path, GEMINI_TRANSCRIPT).unwrap();
        assert_eq!(
            last_identifier(AgentType::GeminiCli, &path).as_deref(),
            Some("m3")
        );
    }

    #[test]
    fn test_token_usage_default_is_empty() {
        assert!(TokenUsage::default().is_empty());
        let mut u = TokenUsage::default();
        u.add(&TokenUsage { input: 1, ..Default::default() });
        assert!(!u.is_empty());
    }
}
