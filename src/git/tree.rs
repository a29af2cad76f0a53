use crate::error::EntireError;
use crate::git::repository::{Repository, exec_git_stdin};
use std::collections::BTreeMap;

/// Well-known id of the empty tree; exists in every repository.
pub const EMPTY_TREE_OID: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// A single blob entry of a flattened tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Octal mode string, e.g. "100644".
    pub mode: String,
    pub oid: String,
}

/// Flatten a tree-ish into a path -> blob entry map via `ls-tree -r -z`.
pub fn flatten_tree(
    repo: &Repository,
    tree_ish: &str,
) -> Result<BTreeMap<String, TreeEntry>, EntireError> {
    let mut args = repo.global_args_for_exec();
    args.push("ls-tree".to_string());
    args.push("-r".to_string());
    args.push("-z".to_string());
    args.push(tree_ish.to_string());

    let output = crate::git::repository::exec_git(&args)?;
    let stdout = String::from_utf8(output.stdout)?;

    let mut entries = BTreeMap::new();
    for record in stdout.split('\0') {
        if record.is_empty() {
            continue;
        }
        // "<mode> <type> <oid>\t<path>"
        let Some((meta, path)) = record.split_once('\t') else {
            continue;
        };
        let fields: Vec<&str> = meta.split_whitespace().collect();
        if fields.len() != 3 || fields[1] != "blob" {
            continue;
        }
        entries.insert(
            path.to_string(),
            TreeEntry {
                mode: fields[0].to_string(),
                oid: fields[2].to_string(),
            },
        );
    }
    Ok(entries)
}

/// Build a tree object from a flattened path -> blob map. Nested trees are
/// written bottom-up with `mktree`; subtrees with no surviving entries are
/// pruned by never being materialized. Returns the root tree oid.
pub fn build_tree(
    repo: &Repository,
    entries: &BTreeMap<String, TreeEntry>,
) -> Result<String, EntireError> {
    if entries.is_empty() {
        return write_mktree(repo, &[]);
    }
    build_tree_level(repo, entries)
}

fn build_tree_level(
    repo: &Repository,
    entries: &BTreeMap<String, TreeEntry>,
) -> Result<String, EntireError> {
    // Partition this level into direct blobs and child subtrees.
    let mut blobs: Vec<(String, TreeEntry)> = Vec::new();
    let mut subtrees: BTreeMap<String, BTreeMap<String, TreeEntry>> = BTreeMap::new();

    for (path, entry) in entries {
        match path.split_once('/') {
            None => blobs.push((path.clone(), entry.clone())),
            Some((dir, rest)) => {
                subtrees
                    .entry(dir.to_string())
                    .or_default()
                    .insert(rest.to_string(), entry.clone());
            }
        }
    }

    // (sort_key, mktree line fields)
    let mut lines: Vec<(Vec<u8>, String, String, String, String)> = Vec::new();
    for (name, entry) in blobs {
        lines.push((
            name.as_bytes().to_vec(),
            entry.mode,
            "blob".to_string(),
            entry.oid,
            name,
        ));
    }
    for (name, children) in subtrees {
        let oid = build_tree_level(repo, &children)?;
        // Directories sort as "name/" in git trees
        let mut key = name.as_bytes().to_vec();
        key.push(b'/');
        lines.push((key, "040000".to_string(), "tree".to_string(), oid, name));
    }

    lines.sort_by(|a, b| a.0.cmp(&b.0));

    let formatted: Vec<(String, String, String, String)> = lines
        .into_iter()
        .map(|(_, mode, kind, oid, name)| (mode, kind, oid, name))
        .collect();
    write_mktree(repo, &formatted)
}

fn write_mktree(
    repo: &Repository,
    entries: &[(String, String, String, String)],
) -> Result<String, EntireError> {
    let mut input = Vec::new();
    for (mode, kind, oid, name) in entries {
        input.extend_from_slice(format!("{} {} {}\t{}", mode, kind, oid, name).as_bytes());
        input.push(0);
    }

    let mut args = repo.global_args_for_exec();
    args.push("mktree".to_string());
    args.push("-z".to_string());
    let output = exec_git_stdin(&args, &input)?;
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}

/// Git's heuristic for binary content: a NUL byte in the first 8000 bytes.
pub fn is_binary(data: &[u8]) -> bool {
    let probe = &data[..data.len().min(8000)];
    probe.contains(&0)
}
