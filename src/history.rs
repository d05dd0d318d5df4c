use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{Balances, Snapshot};

/// Default history file path.
pub const HISTORY_PATH: &str = "balances_history.json";

/// Snapshots older than this (relative to save time) are pruned on every save.
pub const DEFAULT_RETENTION_DAYS: i64 = 3;

/// Timestamp format written to disk (ISO-8601, local, second precision).
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// On-disk layout. Entries stay loosely typed so one bad entry doesn't
/// poison the whole file.
#[derive(Debug, Deserialize)]
struct HistoryFile {
    #[serde(default)]
    entries: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct StoredFile<'a> {
    entries: Vec<StoredEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct StoredEntry<'a> {
    ts: String,
    balances: &'a Balances,
}

/// Append-pruned JSON log of balance snapshots.
///
/// Single writer: the whole file is read at the start of a run and rewritten
/// at the end, without locking.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    retention: Duration,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, retention: Duration) -> Self {
        Self {
            path: path.into(),
            retention,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all parseable snapshots in storage order.
    ///
    /// A missing, unreadable or malformed file yields an empty history.
    pub fn load(&self) -> Vec<Snapshot> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                debug!("No history at {} ({e}), starting empty", self.path.display());
                return Vec::new();
            }
        };
        let file: HistoryFile = match serde_json::from_str(&contents) {
            Ok(f) => f,
            Err(e) => {
                warn!("Ignoring malformed history {}: {e}", self.path.display());
                return Vec::new();
            }
        };

        let total = file.entries.len();
        let snapshots: Vec<Snapshot> = file.entries.iter().filter_map(parse_entry).collect();
        if snapshots.len() < total {
            warn!(
                "Dropped {} unparseable history entries from {}",
                total - snapshots.len(),
                self.path.display()
            );
        }
        debug!("Loaded {} snapshot(s) from {}", snapshots.len(), self.path.display());
        snapshots
    }

    /// Overwrite the file with `entries`, keeping only those within the
    /// retention window of `save_time`.
    pub fn save(&self, entries: &[Snapshot], save_time: NaiveDateTime) -> Result<()> {
        let kept = prune(entries, save_time, self.retention);
        let stored = StoredFile {
            entries: kept
                .iter()
                .map(|s| StoredEntry {
                    ts: s.ts.format(TS_FORMAT).to_string(),
                    balances: &s.balances,
                })
                .collect(),
        };

        let contents =
            serde_json::to_string_pretty(&stored).context("failed to serialize history")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        debug!(
            "Saved {} snapshot(s) to {} ({} pruned)",
            kept.len(),
            self.path.display(),
            entries.len() - kept.len()
        );
        Ok(())
    }

    /// Load, add a snapshot taken at `now`, save.
    ///
    /// Non-finite balances are left out; JSON would store them as `null`
    /// and the whole snapshot would fail to load.
    pub fn append(&self, mut balances: Balances, now: NaiveDateTime) -> Result<()> {
        balances.retain(|address, value| {
            let keep = value.is_finite();
            if !keep {
                warn!("Not recording non-finite balance {value} for {address}");
            }
            keep
        });
        let mut entries = self.load();
        entries.push(Snapshot {
            ts: truncate_to_seconds(now),
            balances,
        });
        self.save(&entries, now)
    }
}

/// Keep snapshots with `ts >= save_time - retention`, preserving order.
pub fn prune(entries: &[Snapshot], save_time: NaiveDateTime, retention: Duration) -> Vec<Snapshot> {
    // A window reaching past the calendar range keeps everything
    let Some(cutoff) = save_time.checked_sub_signed(retention) else {
        return entries.to_vec();
    };
    entries.iter().filter(|s| s.ts >= cutoff).cloned().collect()
}

fn truncate_to_seconds(ts: NaiveDateTime) -> NaiveDateTime {
    ts.with_nanosecond(0).unwrap_or(ts)
}

/// Parse one stored entry; `None` on a bad timestamp or any non-numeric balance.
fn parse_entry(entry: &Value) -> Option<Snapshot> {
    let ts = parse_ts(entry.get("ts")?.as_str()?)?;
    let balances = match entry.get("balances") {
        None | Some(Value::Null) => Balances::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(addr, v)| Some((addr.clone(), balance_value(v)?)))
            .collect::<Option<Balances>>()?,
        Some(_) => return None,
    };
    Some(Snapshot { ts, balances })
}

fn parse_ts(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .or_else(|_| raw.parse::<NaiveDateTime>())
        .ok()
}

fn balance_value(v: &Value) -> Option<f64> {
    let value: f64 = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn snap(ts: NaiveDateTime, pairs: &[(&str, f64)]) -> Snapshot {
        Snapshot {
            ts,
            balances: pairs.iter().map(|(a, v)| (a.to_string(), *v)).collect(),
        }
    }

    fn store(dir: &tempfile::TempDir) -> HistoryStore {
        HistoryStore::new(
            dir.path().join("history.json"),
            Duration::days(DEFAULT_RETENTION_DAYS),
        )
    }

    // ── load ───────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir).load().is_empty());
    }

    #[test]
    fn load_malformed_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        std::fs::write(s.path(), "{ not json").unwrap();
        assert!(s.load().is_empty());
    }

    #[test]
    fn load_drops_bad_entries() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        std::fs::write(
            s.path(),
            r#"{"entries": [
                {"ts": "2025-03-10T10:00:00", "balances": {"qA": 100.5}},
                {"ts": "yesterday", "balances": {"qA": 1}},
                {"ts": "2025-03-10T11:00:00", "balances": {"qA": "oops"}},
                {"balances": {"qA": 1}},
                {"ts": "2025-03-10T12:00:00.250", "balances": {"qB": "7.5"}}
            ]}"#,
        )
        .unwrap();
        let loaded = s.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].ts, at(10, 0));
        assert_eq!(loaded[0].balances["qA"], 100.5);
        assert_eq!(loaded[1].balances["qB"], 7.5);
    }

    #[test]
    fn load_without_entries_key_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        std::fs::write(s.path(), "{}").unwrap();
        assert!(s.load().is_empty());
    }

    // ── save / prune ───────────────────────────────────────────────

    #[test]
    fn save_then_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let entries = vec![
            snap(at(9, 0), &[("qA", 90.0)]),
            snap(at(10, 0), &[("qA", 100.0), ("qB", 5.25)]),
        ];
        s.save(&entries, at(10, 0)).unwrap();
        assert_eq!(s.load(), entries);
    }

    #[test]
    fn save_prunes_older_than_retention() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let now = at(12, 0);
        let entries = vec![
            snap(now - Duration::days(3) - Duration::seconds(1), &[("qA", 1.0)]),
            snap(now - Duration::days(3), &[("qA", 2.0)]),
            snap(now - Duration::hours(1), &[("qA", 3.0)]),
        ];
        s.save(&entries, now).unwrap();
        let loaded = s.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].balances["qA"], 2.0);
    }

    #[test]
    fn later_save_prunes_entries_that_aged_out() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.save(&[snap(at(8, 0), &[("qA", 1.0)])], at(8, 0)).unwrap();
        let later = at(8, 0) + Duration::days(4);
        s.append(Balances::from([("qA".to_string(), 2.0)]), later).unwrap();
        let loaded = s.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].ts, later);
    }

    #[test]
    fn save_keeps_storage_order() {
        let out_of_order = vec![snap(at(11, 0), &[]), snap(at(9, 0), &[])];
        let kept = prune(&out_of_order, at(12, 0), Duration::days(3));
        assert_eq!(kept, out_of_order);
    }

    // ── append ─────────────────────────────────────────────────────

    #[test]
    fn append_adds_one_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.append(Balances::from([("qA".to_string(), 1.0)]), at(9, 0)).unwrap();
        s.append(Balances::from([("qA".to_string(), 2.0)]), at(10, 0)).unwrap();
        let loaded = s.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].balances["qA"], 2.0);
    }

    #[test]
    fn append_leaves_out_non_finite_balances() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let balances = Balances::from([
            ("qA".to_string(), f64::INFINITY),
            ("qB".to_string(), 5.0),
            ("qC".to_string(), f64::NAN),
        ]);
        s.append(balances, at(9, 0)).unwrap();
        let loaded = s.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].balances, Balances::from([("qB".to_string(), 5.0)]));
    }

    #[test]
    fn load_drops_entries_with_non_finite_strings() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        std::fs::write(
            s.path(),
            r#"{"entries": [
                {"ts": "2025-03-10T10:00:00", "balances": {"qA": "inf"}},
                {"ts": "2025-03-10T11:00:00", "balances": {"qA": "12"}}
            ]}"#,
        )
        .unwrap();
        let loaded = s.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].ts, at(11, 0));
    }

    #[test]
    fn append_writes_second_precision_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let now = at(9, 30) + Duration::milliseconds(750);
        s.append(Balances::new(), now).unwrap();
        let raw = std::fs::read_to_string(s.path()).unwrap();
        assert!(raw.contains("\"ts\": \"2025-03-10T09:30:00\""), "{raw}");
    }
}
