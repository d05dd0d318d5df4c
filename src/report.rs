use chrono::NaiveDateTime;

use crate::delta::{DeltaTable, Timeframe};
use crate::types::{BalanceOutcome, BalanceRow, GroupRows};

/// Title line carried by every published message.
pub const REPORT_TITLE: &str = "**Quantus — Balances (@QuantusFaucetBot)**";

/// Owner name used for the cross-group total section.
pub const ALL_OWNER: &str = "ALL";

const NAME_WIDTH: usize = 24;
const BAL_WIDTH: usize = 10;
const DELTA_WIDTH: usize = 8;

/// Deltas smaller than this render as a bare `0`.
const ZERO_EPSILON: f64 = 1e-9;

/// Render a delta: `-` when unavailable, `0` for float noise, otherwise one
/// decimal with an explicit `+` on positives.
pub fn format_delta(delta: Option<f64>) -> String {
    match delta {
        None => "-".to_string(),
        Some(x) if x.abs() < ZERO_EPSILON => "0".to_string(),
        Some(x) if x > 0.0 => format!("+{x:.1}"),
        Some(x) => format!("{x:.1}"),
    }
}

/// Render the `BAL` column for one fetch outcome.
pub fn format_balance(outcome: &BalanceOutcome) -> String {
    match outcome {
        BalanceOutcome::Ok { amount } => format!("{:.1}", amount.value()),
        BalanceOutcome::Timeout => "n/a".to_string(),
        BalanceOutcome::RateLimited { .. } => "WAIT".to_string(),
        BalanceOutcome::TransportError { .. } => "ERR".to_string(),
    }
}

/// Sum of current balances and of available deltas per timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct Totals {
    pub balance: f64,
    pub deltas: Vec<f64>,
}

impl Totals {
    fn zero(timeframes: usize) -> Self {
        Self {
            balance: 0.0,
            deltas: vec![0.0; timeframes],
        }
    }

    /// Unavailable deltas and non-`Ok` balances contribute zero.
    fn add_row(&mut self, row: &BalanceRow, deltas: &DeltaTable, timeframes: &[Timeframe]) {
        self.balance += row.outcome.as_f64();
        for (sum, tf) in self.deltas.iter_mut().zip(timeframes) {
            if let Some(d) = deltas.get(&row.address, &tf.label) {
                *sum += d;
            }
        }
    }

    fn merge(&mut self, other: &Totals) {
        self.balance += other.balance;
        for (sum, d) in self.deltas.iter_mut().zip(&other.deltas) {
            *sum += d;
        }
    }
}

/// Renders fixed-width per-group report messages.
#[derive(Debug, Clone)]
pub struct ReportFormatter {
    timeframes: Vec<Timeframe>,
    grand_total: bool,
}

impl ReportFormatter {
    pub fn new(timeframes: Vec<Timeframe>, grand_total: bool) -> Self {
        Self {
            timeframes,
            grand_total,
        }
    }

    /// Totals for one group's rows.
    pub fn totals(&self, rows: &[BalanceRow], deltas: &DeltaTable) -> Totals {
        let mut totals = Totals::zero(self.timeframes.len());
        for row in rows {
            totals.add_row(row, deltas, &self.timeframes);
        }
        totals
    }

    /// One message per group, plus a `TOTAL (ALL)` message when enabled.
    pub fn render(&self, groups: &[GroupRows], deltas: &DeltaTable, now: NaiveDateTime) -> Vec<String> {
        let ts = now.format("%Y-%m-%d %H:%M").to_string();
        let mut messages = Vec::with_capacity(groups.len() + 1);
        let mut all = Totals::zero(self.timeframes.len());

        for group in groups {
            let mut lines = self.open_section(&ts, &group.owner);
            for row in &group.rows {
                let name = if row.label.is_empty() { "-" } else { &row.label };
                let mut cols = vec![name.to_string(), format_balance(&row.outcome)];
                for tf in &self.timeframes {
                    cols.push(format_delta(deltas.get(&row.address, &tf.label)));
                }
                lines.push(self.format_row(&cols));
            }
            let totals = self.totals(&group.rows, deltas);
            lines.push(self.rule());
            lines.push(self.total_row(&group.owner, &totals));
            lines.push("```".to_string());
            messages.push(lines.join("\n"));
            all.merge(&totals);
        }

        if self.grand_total && !groups.is_empty() {
            let mut lines = self.open_section(&ts, ALL_OWNER);
            lines.push(self.total_row(ALL_OWNER, &all));
            lines.push("```".to_string());
            messages.push(lines.join("\n"));
        }

        messages
    }

    fn open_section(&self, ts: &str, owner: &str) -> Vec<String> {
        let mut headers = vec!["NODE".to_string(), "BAL".to_string()];
        headers.extend(self.timeframes.iter().map(|tf| tf.label.clone()));
        vec![
            format!("{REPORT_TITLE}  \n*{ts}*"),
            owner.to_string(),
            "```".to_string(),
            self.format_row(&headers),
            self.rule(),
        ]
    }

    fn total_row(&self, owner: &str, totals: &Totals) -> String {
        let mut cols = vec![format!("TOTAL ({owner})"), format!("{:.1}", totals.balance)];
        cols.extend(totals.deltas.iter().map(|d| format_delta(Some(*d))));
        self.format_row(&cols)
    }

    fn rule(&self) -> String {
        "-".repeat(NAME_WIDTH + BAL_WIDTH + DELTA_WIDTH * self.timeframes.len())
    }

    fn format_row(&self, cols: &[String]) -> String {
        let mut line = String::new();
        for (i, col) in cols.iter().enumerate() {
            match i {
                0 => line.push_str(&format!("{col:<NAME_WIDTH$}")),
                1 => line.push_str(&format!("{col:>BAL_WIDTH$}")),
                _ => line.push_str(&format!("{col:>DELTA_WIDTH$}")),
            }
        }
        line
    }
}
