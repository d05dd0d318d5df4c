use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{NodeEntry, OwnerGroup};

/// File name prefix/suffix picked up when no manifest is configured.
const DISCOVERY_PREFIX: &str = "nodes";
const DISCOVERY_SUFFIX: &str = ".txt";

/// One entry of the group manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSource {
    pub path: PathBuf,
    /// Explicit owner name; derived from the file stem when absent.
    #[serde(default)]
    pub owner: Option<String>,
}

impl GroupSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            owner: None,
        }
    }

    pub fn owner_name(&self) -> String {
        match &self.owner {
            Some(owner) => owner.clone(),
            None => {
                let stem = self
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                owner_for_stem(&stem)
            }
        }
    }
}

/// Owner name for a source file stem.
///
/// `nodes` and `nodes2` keep their legacy owners; `nodes<N>` becomes
/// `"<N>-Nodes"`; anything else is used as-is.
pub fn owner_for_stem(stem: &str) -> String {
    match stem {
        "nodes" => "Cerveza".to_string(),
        "nodes2" => "Baku".to_string(),
        _ => {
            let digits: String = stem
                .strip_prefix(DISCOVERY_PREFIX)
                .unwrap_or("")
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if digits.is_empty() {
                stem.to_string()
            } else {
                format!("{digits}-Nodes")
            }
        }
    }
}

/// Parse `LABEL ADDRESS` lines. A lone token is an address with an empty label.
pub fn parse_entries(contents: &str) -> Vec<NodeEntry> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [] => None,
                [address] => Some(NodeEntry {
                    label: String::new(),
                    address: address.to_string(),
                }),
                [label, .., address] => Some(NodeEntry {
                    label: label.to_string(),
                    address: address.to_string(),
                }),
            }
        })
        .collect()
}

/// Read one source file; a missing file yields no entries.
pub fn read_entries(path: &Path) -> Result<Vec<NodeEntry>> {
    if !path.exists() {
        warn!("Group source {} does not exist, skipping", path.display());
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_entries(&contents))
}

/// Load every manifest entry into an owner group.
///
/// Groups without entries are skipped. An address already claimed by an
/// earlier group is dropped from the later one with a warning.
pub fn load_groups(sources: &[GroupSource]) -> Result<Vec<OwnerGroup>> {
    let mut claimed: HashMap<String, String> = HashMap::new();
    let mut groups = Vec::new();

    for source in sources {
        let owner = source.owner_name();
        let mut nodes = Vec::new();
        for entry in read_entries(&source.path)? {
            if let Some(first) = claimed.get(&entry.address) {
                warn!(
                    "Address {} listed for both {first} and {owner}, keeping it under {first}",
                    entry.address
                );
                continue;
            }
            claimed.insert(entry.address.clone(), owner.clone());
            nodes.push(entry);
        }
        if nodes.is_empty() {
            debug!("Group {owner} ({}) has no entries", source.path.display());
            continue;
        }
        groups.push(OwnerGroup { owner, nodes });
    }

    Ok(groups)
}

/// Build a manifest from `nodes*.txt` files in `dir`, sorted by file name.
pub fn discover_sources(dir: &Path) -> Result<Vec<GroupSource>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                    name.starts_with(DISCOVERY_PREFIX) && name.ends_with(DISCOVERY_SUFFIX)
                })
        })
        .collect();
    paths.sort();
    Ok(paths.into_iter().map(GroupSource::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── owner_for_stem ─────────────────────────────────────────────

    #[test]
    fn legacy_owner_names() {
        assert_eq!(owner_for_stem("nodes"), "Cerveza");
        assert_eq!(owner_for_stem("nodes2"), "Baku");
    }

    #[test]
    fn numbered_owner_names() {
        assert_eq!(owner_for_stem("nodes3"), "3-Nodes");
        assert_eq!(owner_for_stem("nodes12_extra"), "12-Nodes");
    }

    #[test]
    fn other_stems_verbatim() {
        assert_eq!(owner_for_stem("nodes_backup"), "nodes_backup");
        assert_eq!(owner_for_stem("friends"), "friends");
    }

    #[test]
    fn explicit_owner_overrides_stem() {
        let src = GroupSource {
            path: PathBuf::from("nodes.txt"),
            owner: Some("Lager".into()),
        };
        assert_eq!(src.owner_name(), "Lager");
        assert_eq!(GroupSource::new("dir/nodes7.txt").owner_name(), "7-Nodes");
    }

    // ── parse_entries ──────────────────────────────────────────────

    #[test]
    fn parses_label_address_lines() {
        let entries = parse_entries(
            "# my nodes\n\nnode-1 qzAAA\n  qzBBB  \nnode 3 qzCCC\n#qzDDD\n",
        );
        assert_eq!(
            entries,
            vec![
                NodeEntry {
                    label: "node-1".into(),
                    address: "qzAAA".into()
                },
                NodeEntry {
                    label: String::new(),
                    address: "qzBBB".into()
                },
                NodeEntry {
                    label: "node".into(),
                    address: "qzCCC".into()
                },
            ]
        );
    }

    // ── load_groups ────────────────────────────────────────────────

    #[test]
    fn load_skips_missing_and_empty_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nodes.txt"), "a qA\nb qB\n").unwrap();
        std::fs::write(dir.path().join("nodes2.txt"), "# nothing yet\n").unwrap();
        let sources = vec![
            GroupSource::new(dir.path().join("nodes.txt")),
            GroupSource::new(dir.path().join("nodes2.txt")),
            GroupSource::new(dir.path().join("nodes9.txt")),
        ];
        let groups = load_groups(&sources).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].owner, "Cerveza");
        assert_eq!(groups[0].nodes.len(), 2);
    }

    #[test]
    fn duplicate_address_stays_with_first_owner() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("nodes.txt"), "a qA\n").unwrap();
        std::fs::write(dir.path().join("nodes2.txt"), "again qA\nb qB\n").unwrap();
        let groups = load_groups(&[
            GroupSource::new(dir.path().join("nodes.txt")),
            GroupSource::new(dir.path().join("nodes2.txt")),
        ])
        .unwrap();
        assert_eq!(groups[0].nodes[0].address, "qA");
        assert_eq!(groups[1].owner, "Baku");
        assert_eq!(groups[1].nodes.len(), 1);
        assert_eq!(groups[1].nodes[0].address, "qB");
    }

    // ── discover_sources ───────────────────────────────────────────

    #[test]
    fn discovers_sorted_node_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["nodes2.txt", "nodes.txt", "other.txt", "nodes3.csv"] {
            std::fs::write(dir.path().join(name), "x qX\n").unwrap();
        }
        let found = discover_sources(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|s| s.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["nodes.txt", "nodes2.txt"]);
    }
}
