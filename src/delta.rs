use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::{Address, Balances, Snapshot};

/// Deltas are rounded to this many decimals to keep float noise out of the report.
const DELTA_DECIMALS: i32 = 6;

/// A named lookback window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframe {
    pub label: String,
    pub minutes: u32,
}

impl Timeframe {
    pub fn new(label: impl Into<String>, minutes: u32) -> Self {
        Self {
            label: label.into(),
            minutes,
        }
    }

    pub fn lookback(&self) -> Duration {
        Duration::minutes(i64::from(self.minutes))
    }
}

/// The 12h and 24h windows the report has always shown.
pub fn default_timeframes() -> Vec<Timeframe> {
    vec![Timeframe::new("12h", 720), Timeframe::new("24h", 1440)]
}

/// When a timeframe delta is considered available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BaselinePolicy {
    /// Any snapshot at or before `now - T` that contains the address is a baseline.
    SnapshotAtOrBefore,
    /// Additionally require the address's own first observation to be at
    /// least `T` old.
    #[default]
    RequireOwnHistory,
}

/// Address → timeframe label → delta (`None` = unavailable).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeltaTable {
    by_address: BTreeMap<Address, BTreeMap<String, Option<f64>>>,
}

impl DeltaTable {
    /// Delta for one address and timeframe; `None` if unavailable or unknown.
    pub fn get(&self, address: &str, label: &str) -> Option<f64> {
        self.by_address
            .get(address)
            .and_then(|d| d.get(label))
            .copied()
            .flatten()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<Address, BTreeMap<String, Option<f64>>> {
        self.by_address
    }
}

/// Computes per-address, per-timeframe balance deltas against stored history.
#[derive(Debug, Clone)]
pub struct DeltaEngine {
    timeframes: Vec<Timeframe>,
    policy: BaselinePolicy,
}

impl DeltaEngine {
    pub fn new(timeframes: Vec<Timeframe>, policy: BaselinePolicy) -> Self {
        Self { timeframes, policy }
    }

    /// Compute deltas for every address in `now_balances`.
    ///
    /// The baseline for timeframe `T` is the latest snapshot with
    /// `ts <= now - T`. History order doesn't matter.
    pub fn compute(
        &self,
        now_balances: &Balances,
        history: &[Snapshot],
        now: NaiveDateTime,
    ) -> DeltaTable {
        let mut sorted: Vec<&Snapshot> = history.iter().collect();
        sorted.sort_by_key(|s| s.ts);

        let mut first_seen: HashMap<&str, NaiveDateTime> = HashMap::new();
        for snapshot in &sorted {
            for addr in snapshot.balances.keys() {
                first_seen.entry(addr.as_str()).or_insert(snapshot.ts);
            }
        }

        let baselines: Vec<Option<&Balances>> = self
            .timeframes
            .iter()
            .map(|tf| find_baseline(&sorted, now - tf.lookback()))
            .collect();

        let by_address = now_balances
            .iter()
            .map(|(addr, now_val)| {
                let node_deltas = self
                    .timeframes
                    .iter()
                    .zip(baselines.iter().copied())
                    .map(|(tf, baseline)| {
                        let old_enough = match self.policy {
                            BaselinePolicy::SnapshotAtOrBefore => true,
                            BaselinePolicy::RequireOwnHistory => first_seen
                                .get(addr.as_str())
                                .is_some_and(|seen| now - *seen >= tf.lookback()),
                        };
                        let delta = baseline
                            .filter(|_| old_enough)
                            .and_then(|b| b.get(addr))
                            .map(|prev| round_delta(now_val - prev));
                        (tf.label.clone(), delta)
                    })
                    .collect();
                (addr.clone(), node_deltas)
            })
            .collect();

        DeltaTable { by_address }
    }
}

/// Balances of the last snapshot at or before `target` in an ascending slice.
pub fn find_baseline<'a>(sorted: &[&'a Snapshot], target: NaiveDateTime) -> Option<&'a Balances> {
    sorted
        .iter()
        .copied()
        .take_while(|s| s.ts <= target)
        .last()
        .map(|s| &s.balances)
}

fn round_delta(x: f64) -> f64 {
    let scale = 10f64.powi(DELTA_DECIMALS);
    (x * scale).round() / scale
}
