use chrono::{DateTime, Utc};
use imara_diff::{Algorithm, Diff, InternedInput};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Line-level diff counts between two text contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineCounts {
    pub unchanged: usize,
    pub added: usize,
    pub removed: usize,
}

/// Text content of a tree (or snapshot), keyed by repo-relative path. Binary
/// files are excluded by the snapshot layer and contribute nothing here.
pub type TreeFiles = BTreeMap<String, String>;

/// Line diff via imara-diff, Myers with git-like line post-processing.
/// Empty-vs-nonempty yields all-added or all-removed.
pub fn diff_line_counts(old: &str, new: &str) -> LineCounts {
    if old == new {
        return LineCounts {
            unchanged: count_lines(old),
            added: 0,
            removed: 0,
        };
    }

    let input = InternedInput::new(old, new);
    let mut diff = Diff::compute(Algorithm::Myers, &input);
    diff.postprocess_lines(&input);

    let mut added = 0usize;
    let mut removed = 0usize;
    for hunk in diff.hunks() {
        removed += (hunk.before.end - hunk.before.start) as usize;
        added += (hunk.after.end - hunk.after.start) as usize;
    }

    let total_new = count_lines(new);
    LineCounts {
        unchanged: total_new.saturating_sub(added),
        added,
        removed,
    }
}

fn count_lines(s: &str) -> usize {
    if s.is_empty() { 0 } else { s.lines().count() }
}

/// Attribution snapshot taken at a prompt boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptAttribution {
    pub checkpoint_number: u32,
    pub user_lines_added: u64,
    pub user_lines_removed: u64,
    pub agent_lines_added: u64,
    pub agent_lines_removed: u64,
    #[serde(default)]
    pub user_added_per_file: BTreeMap<String, u64>,
}

/// Final attribution of a condensed checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialAttribution {
    pub calculated_at: DateTime<Utc>,
    pub agent_lines: u64,
    pub human_added: u64,
    pub human_modified: u64,
    pub human_removed: u64,
    pub total_committed: u64,
    pub agent_percentage: f64,
}

/// Compute the user's edits since the last checkpoint, at prompt start.
///
/// For each changed worktree file, user lines are diffed against the shadow
/// tip when one exists, else against the session's base commit. Agent lines
/// are the base-to-shadow delta, and only exist once a shadow snapshot does;
/// the first prompt of a session reports zero agent lines.
pub fn calculate_prompt_attribution(
    checkpoint_number: u32,
    base: &TreeFiles,
    last_checkpoint: Option<&TreeFiles>,
    worktree_changed: &[(String, String)],
) -> PromptAttribution {
    let reference = last_checkpoint.unwrap_or(base);

    let mut attribution = PromptAttribution {
        checkpoint_number,
        ..Default::default()
    };

    for (path, current) in worktree_changed {
        let old = reference.get(path).map(|s| s.as_str()).unwrap_or("");
        let counts = diff_line_counts(old, current);
        attribution.user_lines_added += counts.added as u64;
        attribution.user_lines_removed += counts.removed as u64;
        if counts.added > 0 {
            *attribution
                .user_added_per_file
                .entry(path.clone())
                .or_insert(0) += counts.added as u64;
        }
    }

    if let Some(shadow) = last_checkpoint {
        for path in changed_paths(base, shadow) {
            let old = base.get(&path).map(|s| s.as_str()).unwrap_or("");
            let new = shadow.get(&path).map(|s| s.as_str()).unwrap_or("");
            let counts = diff_line_counts(old, new);
            attribution.agent_lines_added += counts.added as u64;
            attribution.agent_lines_removed += counts.removed as u64;
        }
    }

    attribution
}

/// Paths whose content differs between two snapshots.
fn changed_paths(a: &TreeFiles, b: &TreeFiles) -> BTreeSet<String> {
    let mut paths = BTreeSet::new();
    for path in a.keys().chain(b.keys()) {
        if a.get(path) != b.get(path) {
            paths.insert(path.clone());
        }
    }
    paths
}

/// Final attribution at condensation time, splitting the commit's lines
/// between the agent and the human.
///
/// The estimate never lets a user's edits to their own earlier additions
/// count against the agent: accumulated churn (removals paired with the
/// user's accumulated additions) and per-file LIFO self-modifications are
/// both subtracted before anything is charged to the agent's lines.
pub fn calculate_attribution_with_accumulated(
    base: &TreeFiles,
    shadow: &TreeFiles,
    head: &TreeFiles,
    files_touched: &BTreeSet<String>,
    prompt_attributions: &[PromptAttribution],
) -> InitialAttribution {
    // 1. Accumulated user edits across all prompt boundaries.
    let mut accumulated_added = 0u64;
    let mut accumulated_removed = 0u64;
    let mut accumulated_per_file: BTreeMap<String, u64> = BTreeMap::new();
    for pa in prompt_attributions {
        accumulated_added += pa.user_lines_added;
        accumulated_removed += pa.user_lines_removed;
        for (path, added) in &pa.user_added_per_file {
            *accumulated_per_file.entry(path.clone()).or_insert(0) += added;
        }
    }

    // Accumulated removals are already reflected in the shadow snapshot (the
    // next save re-captured the worktree), so they pair with the user's own
    // accumulated additions (LIFO). Net that churn out of the per-file map
    // before it can offset the agent's work in step 6.
    let accumulated_self = accumulated_added.min(accumulated_removed);
    let mut net_per_file = accumulated_per_file.clone();
    let mut churn = accumulated_self;
    for added in net_per_file.values_mut() {
        if churn == 0 {
            break;
        }
        let eaten = (*added).min(churn);
        *added -= eaten;
        churn -= eaten;
    }

    // 2. All work on agent files, base -> shadow. This includes any user
    // edits the agent's snapshots absorbed.
    let mut agent_and_user_added = 0u64;
    for path in files_touched {
        let old = base.get(path).map(|s| s.as_str()).unwrap_or("");
        let new = shadow.get(path).map(|s| s.as_str()).unwrap_or("");
        agent_and_user_added += diff_line_counts(old, new).added as u64;
    }

    // 3. Post-checkpoint user edits on agent files, shadow -> head.
    let mut post_added_agent_files = 0u64;
    let mut post_removed_agent_files = 0u64;
    let mut post_removed_per_file: BTreeMap<String, u64> = BTreeMap::new();
    for path in files_touched {
        let old = shadow.get(path).map(|s| s.as_str()).unwrap_or("");
        let new = head.get(path).map(|s| s.as_str()).unwrap_or("");
        let counts = diff_line_counts(old, new);
        post_added_agent_files += counts.added as u64;
        post_removed_agent_files += counts.removed as u64;
        if counts.removed > 0 {
            post_removed_per_file.insert(path.clone(), counts.removed as u64);
        }
    }

    // 4. User edits on files the agent never touched, base -> head.
    let mut post_added_other = 0u64;
    let mut post_removed_other = 0u64;
    for path in changed_paths(base, head) {
        if files_touched.contains(&path) {
            continue;
        }
        let old = base.get(&path).map(|s| s.as_str()).unwrap_or("");
        let new = head.get(&path).map(|s| s.as_str()).unwrap_or("");
        let counts = diff_line_counts(old, new);
        post_added_other += counts.added as u64;
        post_removed_other += counts.removed as u64;
        if counts.removed > 0 {
            *post_removed_per_file.entry(path).or_insert(0) += counts.removed as u64;
        }
    }

    // 5. Surviving accumulated additions that landed on agent files.
    let accumulated_on_agent_files: u64 = net_per_file
        .iter()
        .filter(|(path, _)| files_touched.contains(path.as_str()))
        .map(|(_, added)| *added)
        .sum();

    // 6. The agent's own additions.
    let agent_added = agent_and_user_added.saturating_sub(accumulated_on_agent_files);

    // 7. Totals across accumulated and post-checkpoint edits.
    let total_user_added = accumulated_added + post_added_agent_files + post_added_other;
    let total_user_removed = accumulated_removed + post_removed_agent_files + post_removed_other;

    // 8. Modifications, then the share of them that targeted agent lines.
    // Post-checkpoint removals consume the user's own surviving per-file
    // additions first (LIFO) before counting against the agent.
    let human_modified = total_user_added.min(total_user_removed);
    let post_self: u64 = post_removed_per_file
        .iter()
        .map(|(path, removed)| {
            let own = net_per_file.get(path).copied().unwrap_or(0);
            own.min(*removed)
        })
        .sum();
    let self_modifications = (accumulated_self + post_self).min(human_modified);
    let modifications_targeting_agent = human_modified - self_modifications;

    // 9. Agent lines that survived into the commit.
    let pure_user_added = total_user_added - human_modified;
    let pure_user_removed = total_user_removed - human_modified;
    let agent_lines = agent_added
        .saturating_sub(pure_user_removed)
        .saturating_sub(modifications_targeting_agent);

    // 10. Denominator, with a delete-only fallback.
    let total_committed = (agent_added + pure_user_added).saturating_sub(pure_user_removed);
    let total_committed = if total_committed == 0 {
        agent_added
    } else {
        total_committed
    };

    // 11.
    let agent_percentage = if total_committed > 0 {
        ((agent_lines as f64 / total_committed as f64) * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    InitialAttribution {
        calculated_at: Utc::now(),
        agent_lines,
        human_added: pure_user_added,
        human_modified,
        human_removed: pure_user_removed,
        total_committed,
        agent_percentage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(entries: &[(&str, &str)]) -> TreeFiles {
        entries
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    fn touched(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_diff_line_counts_basic() {
        let counts = diff_line_counts("a\nb\nc\n", "a\nx\nc\n");
        assert_eq!(counts.added, 1);
        assert_eq!(counts.removed, 1);
        assert_eq!(counts.unchanged, 2);
    }

    #[test]
    fn test_diff_line_counts_empty_vs_nonempty() {
        let counts = diff_line_counts("", "a\nb\nc\n");
        assert_eq!(counts.added, 3);
        assert_eq!(counts.removed, 0);

        let counts = diff_line_counts("a\nb\nc\n", "");
        assert_eq!(counts.added, 0);
        assert_eq!(counts.removed, 3);
    }

    #[test]
    fn test_diff_line_counts_identical() {
        let counts = diff_line_counts("a\nb\n", "a\nb\n");
        assert_eq!(counts.added, 0);
        assert_eq!(counts.removed, 0);
        assert_eq!(counts.unchanged, 2);
    }

    #[test]
    fn test_prompt_attribution_first_prompt_has_no_agent_lines() {
        let base = tree(&[("foo.rs", "fn a() {}\n")]);
        let changed = vec![("foo.rs".to_string(), "fn a() {}\nfn b() {}\n".to_string())];

        let pa = calculate_prompt_attribution(1, &base, None, &changed);
        assert_eq!(pa.checkpoint_number, 1);
        assert_eq!(pa.user_lines_added, 1);
        assert_eq!(pa.user_lines_removed, 0);
        assert_eq!(pa.agent_lines_added, 0);
        assert_eq!(pa.agent_lines_removed, 0);
        assert_eq!(pa.user_added_per_file.get("foo.rs"), Some(&1));
    }

    #[test]
    fn test_prompt_attribution_against_shadow() {
        let base = tree(&[]);
        let shadow = tree(&[("foo.rs", "agent line\n")]);
        // User appended one line after the agent's snapshot
        let changed = vec![("foo.rs".to_string(), "agent line\nuser line\n".to_string())];

        let pa = calculate_prompt_attribution(2, &base, Some(&shadow), &changed);
        assert_eq!(pa.user_lines_added, 1);
        assert_eq!(pa.agent_lines_added, 1);
    }

    #[test]
    fn test_attribution_all_agent_is_100_percent() {
        // Invariant (a): no user edits between base and head
        let base = tree(&[]);
        let shadow = tree(&[("foo.go", "one line\n")]);
        let head = shadow.clone();

        let attribution = calculate_attribution_with_accumulated(
            &base,
            &shadow,
            &head,
            &touched(&["foo.go"]),
            &[],
        );
        assert_eq!(attribution.agent_lines, 1);
        assert_eq!(attribution.human_added, 0);
        assert_eq!(attribution.total_committed, 1);
        assert_eq!(attribution.agent_percentage, 100.0);
    }

    #[test]
    fn test_attribution_all_user_is_0_percent() {
        // Invariant (b): the agent made no edits
        let base = tree(&[]);
        let shadow = tree(&[]);
        let head = tree(&[("notes.md", "user wrote this\nand this\n")]);

        let attribution =
            calculate_attribution_with_accumulated(&base, &shadow, &head, &touched(&[]), &[]);
        assert_eq!(attribution.agent_lines, 0);
        assert_eq!(attribution.human_added, 2);
        assert_eq!(attribution.agent_percentage, 0.0);
    }

    #[test]
    fn test_attribution_self_edit_does_not_reduce_agent_share() {
        // Invariant (c): the user rewrote their own earlier additions; the
        // agent's contribution is untouched.
        let base = tree(&[]);
        // Agent wrote 3 lines; user's accumulated edits added 2 of their own
        // (captured by the later snapshot) then rewrote them.
        let shadow = tree(&[(
            "foo.rs",
            "agent 1\nagent 2\nagent 3\nuser rewritten 1\nuser rewritten 2\n",
        )]);
        let head = shadow.clone();

        let attributions = vec![
            PromptAttribution {
                checkpoint_number: 1,
                user_lines_added: 2,
                user_added_per_file: [("foo.rs".to_string(), 2)].into_iter().collect(),
                ..Default::default()
            },
            PromptAttribution {
                checkpoint_number: 2,
                user_lines_added: 2,
                user_lines_removed: 2,
                user_added_per_file: [("foo.rs".to_string(), 2)].into_iter().collect(),
                ..Default::default()
            },
        ];

        let attribution = calculate_attribution_with_accumulated(
            &base,
            &shadow,
            &head,
            &touched(&["foo.rs"]),
            &attributions,
        );

        assert_eq!(attribution.agent_lines, 3);
        assert!(attribution.human_modified > 0);
        assert_eq!(attribution.human_added, 2);
        assert_eq!(attribution.total_committed, 5);
    }

    #[test]
    fn test_attribution_post_checkpoint_replacement() {
        // User replaced 2 agent lines with 2 of their own before committing.
        let base = tree(&[]);
        let shadow = tree(&[("foo.rs", "agent 1\nagent 2\nagent 3\nagent 4\n")]);
        let head = tree(&[("foo.rs", "agent 1\nagent 2\nuser 1\nuser 2\n")]);

        let attribution = calculate_attribution_with_accumulated(
            &base,
            &shadow,
            &head,
            &touched(&["foo.rs"]),
            &[],
        );

        assert_eq!(attribution.human_modified, 2);
        assert_eq!(attribution.agent_lines, 2);
        assert_eq!(attribution.total_committed, 4);
        assert_eq!(attribution.agent_percentage, 50.0);
    }

    #[test]
    fn test_attribution_partial_commit_keeps_percentage_consistent() {
        // Agent wrote 5 lines to foo and 3 to bar, the user committed foo
        // only; bar's lines drop out of both numerator and denominator.
        let base = tree(&[]);
        let shadow = tree(&[
            ("foo.go", "1\n2\n3\n4\n5\n"),
            ("bar.go", "a\nb\nc\n"),
        ]);
        let head = tree(&[("foo.go", "1\n2\n3\n4\n5\n")]);

        let attribution = calculate_attribution_with_accumulated(
            &base,
            &shadow,
            &head,
            &touched(&["foo.go", "bar.go"]),
            &[],
        );

        assert_eq!(attribution.agent_lines, 5);
        assert_eq!(attribution.total_committed, 5);
        assert_eq!(attribution.agent_percentage, 100.0);
    }

    #[test]
    fn test_attribution_delete_only_commit_falls_back() {
        let base = tree(&[("junk.rs", "x\ny\n")]);
        let shadow = tree(&[]);
        let head = tree(&[]);

        let attribution = calculate_attribution_with_accumulated(
            &base,
            &shadow,
            &head,
            &touched(&["junk.rs"]),
            &[],
        );
        // Agent deleted both lines: zero additions anywhere, denominator
        // falls back to agent_added (0) and the percentage stays defined.
        assert_eq!(attribution.total_committed, 0);
        assert_eq!(attribution.agent_percentage, 0.0);
    }

    #[test]
    fn test_attribution_percentage_bounds() {
        let base = tree(&[("a.rs", "1\n2\n")]);
        let shadow = tree(&[("a.rs", "1\n2\n3\n4\n")]);
        let head = tree(&[("a.rs", "3\n4\n")]);

        let attribution = calculate_attribution_with_accumulated(
            &base,
            &shadow,
            &head,
            &touched(&["a.rs"]),
            &[],
        );
        assert!(attribution.agent_percentage >= 0.0);
        assert!(attribution.agent_percentage <= 100.0);
    }
}
