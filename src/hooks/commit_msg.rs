use std::fs;
use std::path::Path;

use crate::checkpoint::trailers::{
    has_checkpoint_trailer, message_has_user_content, strip_checkpoint_trailer,
};
use crate::error::EntireError;

/// The `commit-msg` contract. When the user deleted every line of their
/// message but our trailer survived, strip it and return exit code 1 so git
/// aborts what would otherwise become an empty commit carrying only tool
/// metadata. This is the only hook verb allowed to block a git operation.
pub fn run(msg_file: &Path) -> Result<i32, EntireError> {
    let message = fs::read_to_string(msg_file)?;

    if !has_checkpoint_trailer(&message) {
        return Ok(0);
    }
    if message_has_user_content(&message) {
        return Ok(0);
    }

    let (stripped, _) = strip_checkpoint_trailer(&message);
    fs::write(msg_file, stripped)?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_msg(dir: &tempfile::TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("COMMIT_EDITMSG");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_normal_message_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_msg(&dir, "Fix widget\n\nEntire-Checkpoint: a1b2c3d4e5f6\n");
        assert_eq!(run(&path).unwrap(), 0);
        // Message untouched
        assert!(fs::read_to_string(&path).unwrap().contains("Entire-Checkpoint"));
    }

    #[test]
    fn test_no_trailer_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_msg(&dir, "just a message\n");
        assert_eq!(run(&path).unwrap(), 0);
    }

    #[test]
    fn test_trailer_only_message_is_stripped_and_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_msg(
            &dir,
            "\n# Please enter the commit message.\nEntire-Checkpoint: a1b2c3d4e5f6\n# comment\n",
        );
        assert_eq!(run(&path).unwrap(), 1);
        let remaining = fs::read_to_string(&path).unwrap();
        assert!(!remaining.contains("Entire-Checkpoint"));
    }
}
