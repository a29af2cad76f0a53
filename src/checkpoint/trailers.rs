use crate::checkpoint::id::CheckpointId;

pub const TRAILER_CHECKPOINT: &str = "Entire-Checkpoint";
pub const TRAILER_SESSION: &str = "Entire-Session";
pub const TRAILER_METADATA: &str = "Entire-Metadata";
pub const TRAILER_EPHEMERAL_BRANCH: &str = "Ephemeral-branch";

const REMOVAL_HINT: &str = "\
# The Entire-Checkpoint trailer above links this commit to the agent
# session that produced it. Delete the trailer line to opt this commit
# out of checkpoint tracking.";

/// Extract the value of a trailer key from a commit message. Lines starting
/// with `#` are ignored; a missing or malformed trailer yields None, never a
/// partial value.
pub fn extract_trailer(message: &str, key: &str) -> Option<String> {
    let prefix = format!("{}: ", key);
    message
        .lines()
        .rev()
        .filter(|line| !line.trim_start().starts_with('#'))
        .find_map(|line| {
            let trimmed = line.trim();
            trimmed
                .strip_prefix(prefix.as_str())
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
}

/// Extract and validate the checkpoint id trailer. An invalid id reads as
/// "not found".
pub fn extract_checkpoint_id(message: &str) -> Option<CheckpointId> {
    extract_trailer(message, TRAILER_CHECKPOINT)?.parse().ok()
}

pub fn has_checkpoint_trailer(message: &str) -> bool {
    extract_checkpoint_id(message).is_some()
}

/// Append an `Entire-Checkpoint` trailer to a commit message, preserving any
/// unrelated trailers that are already there. In editor mode the trailer is
/// followed by a comment block explaining how to remove it; git strips the
/// comments before committing.
pub fn append_checkpoint_trailer(message: &str, id: &CheckpointId, editor_mode: bool) -> String {
    let mut out = message.trim_end_matches('\n').to_string();

    if !ends_with_trailer_block(&out) {
        out.push('\n');
    }
    out.push_str(&format!("\n{}: {}\n", TRAILER_CHECKPOINT, id));

    if editor_mode {
        out.push_str(REMOVAL_HINT);
        out.push('\n');
    }
    out
}

/// Whether the last non-blank, non-comment line already looks like a trailer
/// (contains `": "`). Appending directly after an existing trailer block
/// keeps git treating the whole block as trailers.
fn ends_with_trailer_block(message: &str) -> bool {
    message
        .lines()
        .rev()
        .find(|line| {
            let t = line.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .map(|line| line.contains(": "))
        .unwrap_or(false)
}

/// Remove any `Entire-Checkpoint` trailer lines. Returns the cleaned message
/// and whether anything was removed.
pub fn strip_checkpoint_trailer(message: &str) -> (String, bool) {
    let prefix = format!("{}: ", TRAILER_CHECKPOINT);
    let mut removed = false;
    let kept: Vec<&str> = message
        .lines()
        .filter(|line| {
            let is_trailer = line.trim().starts_with(prefix.as_str());
            if is_trailer {
                removed = true;
            }
            !is_trailer
        })
        .collect();
    let mut out = kept.join("\n");
    if message.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    (out, removed)
}

/// Whether any user-authored content remains: a line that is not blank, not a
/// `#` comment, and not one of our trailers.
pub fn message_has_user_content(message: &str) -> bool {
    let checkpoint_prefix = format!("{}: ", TRAILER_CHECKPOINT);
    message.lines().any(|line| {
        let t = line.trim();
        !t.is_empty() && !t.starts_with('#') && !t.starts_with(checkpoint_prefix.as_str())
    })
}

/// The full trailer block written on checkpoint-branch commits.
pub fn format_commit_trailers(
    id: &CheckpointId,
    session_id: &str,
    shadow_branch: &str,
    metadata_dir: &str,
) -> String {
    format!(
        "{}: {}\n{}: {}\n{}: {}\n{}: {}\n",
        TRAILER_CHECKPOINT,
        id,
        TRAILER_SESSION,
        session_id,
        TRAILER_EPHEMERAL_BRANCH,
        shadow_branch,
        TRAILER_METADATA,
        metadata_dir,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> CheckpointId {
        "a1b2c3d4e5f6".parse().unwrap()
    }

    #[test]
    fn test_round_trip() {
        let message = append_checkpoint_trailer("Fix the widget\n", &id(), false);
        assert_eq!(extract_checkpoint_id(&message), Some(id()));
    }

    #[test]
    fn test_append_inserts_blank_separator() {
        let message = append_checkpoint_trailer("Fix the widget", &id(), false);
        assert_eq!(message, "Fix the widget\n\nEntire-Checkpoint: a1b2c3d4e5f6\n");
    }

    #[test]
    fn test_append_after_existing_trailers() {
        let message = "Fix the widget\n\nSigned-off-by: Dev <dev@example.com>";
        let out = append_checkpoint_trailer(message, &id(), false);
        assert_eq!(
            out,
            "Fix the widget\n\nSigned-off-by: Dev <dev@example.com>\nEntire-Checkpoint: a1b2c3d4e5f6\n"
        );
    }

    #[test]
    fn test_editor_mode_comment_block() {
        let out = append_checkpoint_trailer("Fix\n", &id(), true);
        assert!(out.contains("Entire-Checkpoint: a1b2c3d4e5f6"));
        assert!(out.lines().any(|l| l.starts_with('#')));
        // Comments do not confuse extraction
        assert_eq!(extract_checkpoint_id(&out), Some(id()));
    }

    #[test]
    fn test_extract_ignores_comment_lines() {
        let message = "Fix\n\n# Entire-Checkpoint: 000000000000\nEntire-Checkpoint: a1b2c3d4e5f6\n";
        assert_eq!(extract_checkpoint_id(message), Some(id()));
    }

    #[test]
    fn test_extract_rejects_invalid_id() {
        let message = "Fix\n\nEntire-Checkpoint: not-hex\n";
        assert_eq!(extract_checkpoint_id(message), None);
        assert!(!has_checkpoint_trailer(message));
    }

    #[test]
    fn test_extract_other_keys() {
        let message = "msg\n\nEntire-Session: 2025-01-02-abc\nEphemeral-branch: entire/ab12cd3\n";
        assert_eq!(
            extract_trailer(message, TRAILER_SESSION).as_deref(),
            Some("2025-01-02-abc")
        );
        assert_eq!(
            extract_trailer(message, TRAILER_EPHEMERAL_BRANCH).as_deref(),
            Some("entire/ab12cd3")
        );
        assert_eq!(extract_trailer(message, TRAILER_METADATA), None);
    }

    #[test]
    fn test_strip_removes_only_our_trailer() {
        let message = "Fix\n\nSigned-off-by: Dev <dev@example.com>\nEntire-Checkpoint: a1b2c3d4e5f6\n";
        let (cleaned, removed) = strip_checkpoint_trailer(message);
        assert!(removed);
        assert!(cleaned.contains("Signed-off-by"));
        assert!(!cleaned.contains("Entire-Checkpoint"));
    }

    #[test]
    fn test_message_has_user_content() {
        assert!(message_has_user_content("Fix\n\nEntire-Checkpoint: a1b2c3d4e5f6\n"));
        assert!(!message_has_user_content("\n# comment\nEntire-Checkpoint: a1b2c3d4e5f6\n"));
        assert!(!message_has_user_content("# only comments\n"));
    }
}
