use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::{info, warn};

use crate::delta::{DeltaEngine, DeltaTable};
use crate::fetch::BalanceFetcher;
use crate::history::HistoryStore;
use crate::report::ReportFormatter;
use crate::types::{Balances, GroupRows, OwnerGroup, RunSummary};
use crate::webhook::{Publish, publish_all};

/// Everything computed in one run before anything is published or saved.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub now: NaiveDateTime,
    pub groups: Vec<GroupRows>,
    pub now_balances: Balances,
    pub deltas: DeltaTable,
    pub messages: Vec<String>,
}

impl RunReport {
    pub fn summary(&self, messages_published: usize, history_saved: bool) -> RunSummary {
        let addresses_total = self.groups.iter().map(|g| g.rows.len()).sum();
        RunSummary {
            timestamp: self.now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            groups: self.groups.clone(),
            deltas: self.deltas.clone().into_inner(),
            addresses_total,
            addresses_ok: self.now_balances.len(),
            messages_published,
            history_saved,
        }
    }
}

/// Balances of every address that produced an amount this run.
pub fn current_balances(groups: &[GroupRows]) -> Balances {
    groups
        .iter()
        .flat_map(|g| &g.rows)
        .filter_map(|row| Some((row.address.clone(), row.outcome.value()?)))
        .collect()
}

/// Drives one sequential pass: fetch → deltas → messages → publish → persist.
pub struct Runner<'a> {
    fetcher: BalanceFetcher<'a>,
    engine: DeltaEngine,
    formatter: ReportFormatter,
    history: HistoryStore,
}

impl<'a> Runner<'a> {
    pub fn new(
        fetcher: BalanceFetcher<'a>,
        engine: DeltaEngine,
        formatter: ReportFormatter,
        history: HistoryStore,
    ) -> Self {
        Self {
            fetcher,
            engine,
            formatter,
            history,
        }
    }

    /// Fetch all groups in order; `on_group` sees each group as it completes.
    pub async fn fetch_all(
        &self,
        groups: &[OwnerGroup],
        mut on_group: impl FnMut(&GroupRows),
    ) -> Vec<GroupRows> {
        let mut fetched = Vec::with_capacity(groups.len());
        for group in groups {
            let rows = self.fetcher.fetch_group(group).await;
            on_group(&rows);
            fetched.push(rows);
        }
        fetched
    }

    /// Compute deltas against stored history and render the report.
    pub fn evaluate(&self, groups: Vec<GroupRows>, now: NaiveDateTime) -> RunReport {
        let now_balances = current_balances(&groups);
        let history = self.history.load();
        let deltas = self.engine.compute(&now_balances, &history, now);
        let messages = self.formatter.render(&groups, &deltas, now);
        info!(
            "Computed deltas for {} address(es) against {} snapshot(s)",
            deltas.len(),
            history.len()
        );
        RunReport {
            now,
            groups,
            now_balances,
            deltas,
            messages,
        }
    }

    /// Deliver every message; failures are logged and skipped.
    pub async fn publish(&self, report: &RunReport, publisher: &dyn Publish) -> usize {
        let delivered = publish_all(publisher, &report.messages).await;
        if delivered < report.messages.len() {
            warn!(
                "Published {delivered}/{} message(s)",
                report.messages.len()
            );
        } else {
            info!("Published {delivered} message(s)");
        }
        delivered
    }

    /// Append this run's balances to the history file.
    pub fn persist(&self, report: &RunReport, saved_at: NaiveDateTime) -> Result<()> {
        self.history.append(report.now_balances.clone(), saved_at)?;
        info!(
            "Saved snapshot of {} balance(s) to {}",
            report.now_balances.len(),
            self.history.path().display()
        );
        Ok(())
    }
}
