use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::amount::normalize_number;

/// Opaque q-address identifier.
pub type Address = String;

/// Address → observed balance.
pub type Balances = BTreeMap<Address, f64>;

/// One `LABEL ADDRESS` line from a group source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub label: String,
    pub address: Address,
}

/// A named set of labeled addresses sourced from one input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerGroup {
    pub owner: String,
    pub nodes: Vec<NodeEntry>,
}

/// One timestamped mapping from address to observed balance.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub ts: NaiveDateTime,
    pub balances: Balances,
}

/// Unit the faucet bot reports balances in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "QU")]
    Qu,
    #[serde(rename = "QNT")]
    Qnt,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Qu => "QU",
            Unit::Qnt => "QNT",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized amount extracted from a bot reply.
///
/// `number` keeps the normalized digits exactly as extracted (`"1234.56"`),
/// so the displayed form is stable regardless of float formatting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub number: String,
    pub unit: Unit,
}

impl Amount {
    /// Numeric value, `0.0` if the normalized digits don't parse.
    pub fn value(&self) -> f64 {
        crate::amount::parse_balance(&self.to_string())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.number, self.unit)
    }
}

/// Result of asking the bot for one address's balance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BalanceOutcome {
    Ok { amount: Amount },
    /// No qualifying reply before the reply timeout.
    Timeout,
    /// Transport asked us to back off; the run slept for `retry_after`.
    RateLimited {
        #[serde(with = "duration_secs")]
        retry_after: Duration,
    },
    TransportError { detail: String },
}

impl BalanceOutcome {
    /// Balance value for `Ok` outcomes whose digits fit a finite `f64`.
    pub fn value(&self) -> Option<f64> {
        match self {
            BalanceOutcome::Ok { amount } => normalize_number(&amount.number)
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite()),
            _ => None,
        }
    }

    /// Balance value with every non-`Ok` outcome counting as zero.
    pub fn as_f64(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl fmt::Display for BalanceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceOutcome::Ok { amount } => write!(f, "{amount}"),
            BalanceOutcome::Timeout => f.write_str("no answer"),
            BalanceOutcome::RateLimited { retry_after } => {
                write!(f, "rate limited ({}s)", retry_after.as_secs())
            }
            BalanceOutcome::TransportError { detail } => write!(f, "error: {detail}"),
        }
    }
}

/// One fetched address within a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceRow {
    pub label: String,
    pub address: Address,
    pub outcome: BalanceOutcome,
}

/// Fetched rows for one owner group, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupRows {
    pub owner: String,
    pub rows: Vec<BalanceRow>,
}

/// Machine-readable summary of one run, emitted with `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub groups: Vec<GroupRows>,
    pub deltas: BTreeMap<Address, BTreeMap<String, Option<f64>>>,
    pub addresses_total: usize,
    pub addresses_ok: usize,
    pub messages_published: usize,
    pub history_saved: bool,
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
