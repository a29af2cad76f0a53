use crate::checkpoint::id::CheckpointId;
use crate::error::EntireError;
use crate::git::repository::Repository;
use crate::query::{
    DEFAULT_REWIND_SCAN_LIMIT, get_rewind_points, list_checkpoints, read_attribution,
    read_prompts, read_transcript,
};

/// `entire checkpoints [--limit N]`
pub fn checkpoints(limit: Option<usize>) -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    let mut rows = list_checkpoints(&repo)?;
    if let Some(limit) = limit {
        rows.truncate(limit);
    }

    if rows.is_empty() {
        println!("No checkpoints recorded yet.");
        return Ok(());
    }
    for info in rows {
        println!(
            "{}  {}  {}  {} session(s), {} file(s)",
            info.checkpoint_id,
            info.created_at.format("%Y-%m-%d %H:%M"),
            info.agent,
            info.session_ids.len(),
            info.files_touched.len(),
        );
    }
    Ok(())
}

/// `entire rewind --list`
pub fn rewind_points(limit: Option<usize>) -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    let points = get_rewind_points(&repo, limit.unwrap_or(DEFAULT_REWIND_SCAN_LIMIT))?;

    if points.is_empty() {
        println!("No rewind points found.");
        return Ok(());
    }
    for point in points {
        let kind = if point.metadata_dir.is_empty() {
            "logs-only"
        } else {
            "checkpoint"
        };
        println!(
            "{}  {}  {}  {}",
            point.id,
            &point.commit[..point.commit.len().min(7)],
            point.created_at.format("%Y-%m-%d %H:%M"),
            kind,
        );
        if let Some(summary) = point.summary {
            println!("    {}", summary);
        }
    }
    Ok(())
}

/// `entire show <id> [--session <sid>] [--transcript|--attribution]`
pub fn show(
    id: &str,
    session: Option<&str>,
    transcript: bool,
    attribution: bool,
) -> Result<(), EntireError> {
    let repo = Repository::discover()?;
    let id: CheckpointId = id.parse()?;

    let Some((summary, sessions)) = crate::checkpoint::store::read_committed(&repo, &id)? else {
        return Err(EntireError::Generic(format!("No checkpoint {}", id)));
    };

    let session_id = match session {
        Some(sid) => sid.to_string(),
        None => summary
            .sessions
            .first()
            .map(|s| s.session_id.clone())
            .ok_or_else(|| EntireError::Generic("Checkpoint has no sessions".to_string()))?,
    };

    if transcript {
        if let Some(content) = read_transcript(&repo, &id, &session_id)? {
            print!("{}", content);
        }
        return Ok(());
    }
    if attribution {
        if let Some(attr) = read_attribution(&repo, &id, &session_id)? {
            println!("{}", serde_json::to_string_pretty(&attr)?);
        }
        return Ok(());
    }

    println!("checkpoint {}", summary.checkpoint_id);
    println!("created    {}", summary.created_at.to_rfc3339());
    println!("agent      {}", summary.agent);
    println!("files      {}", summary.files_touched.join(", "));
    for meta in &sessions {
        println!("session    {} ({})", meta.session_id, meta.strategy);
        if let Some(ref attr) = meta.initial_attribution {
            println!(
                "  agent lines {} / {} committed ({:.0}%)",
                attr.agent_lines, attr.total_committed, attr.agent_percentage
            );
        }
    }
    if let Some(prompts) = read_prompts(&repo, &id, &session_id)? {
        let first = prompts.split("\n\n---\n\n").next().unwrap_or("");
        if !first.trim().is_empty() {
            println!("prompt     {}", crate::utils::truncate_chars(first.trim(), 200));
        }
    }
    Ok(())
}
