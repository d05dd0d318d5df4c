use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::amount::{is_placeholder, parse_amount};
use crate::transport::{ChatTransport, TransportError};
use crate::types::{BalanceOutcome, BalanceRow, GroupRows, OwnerGroup};

/// How many recent messages to request per poll.
const POLL_LIMIT: usize = 12;

/// The command the faucet bot answers with a balance.
pub fn balance_command(address: &str) -> String {
    format!("/balance {address}")
}

/// Timing knobs for the request/poll loop.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Give up on an address after this long without a parseable reply.
    pub reply_timeout: Duration,
    /// Interval between polls for new messages.
    pub step_wait: Duration,
    /// Pause after each address to stay under the bot's rate limits.
    pub delay_between: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            reply_timeout: Duration::from_secs(45),
            step_wait: Duration::from_millis(800),
            delay_between: Duration::from_millis(1800),
        }
    }
}

/// Asks the bot for balances one address at a time.
pub struct BalanceFetcher<'a> {
    transport: &'a dyn ChatTransport,
    bot: String,
    settings: FetchSettings,
}

impl<'a> BalanceFetcher<'a> {
    pub fn new(transport: &'a dyn ChatTransport, bot: impl Into<String>, settings: FetchSettings) -> Self {
        Self {
            transport,
            bot: bot.into(),
            settings,
        }
    }

    /// Send the balance command and poll until a reply carries an amount.
    ///
    /// Echoes and progress notes are skipped. Never fails: timeouts, rate
    /// limits and transport errors come back as outcomes.
    pub async fn ask_balance(&self, address: &str) -> BalanceOutcome {
        let command = balance_command(address);
        let sent_id = match self.transport.send_message(&self.bot, &command).await {
            Ok(id) => id,
            Err(e) => return self.on_error(address, e).await,
        };

        let deadline = Instant::now() + self.settings.reply_timeout;
        while Instant::now() < deadline {
            let mut messages = match self
                .transport
                .messages_since(&self.bot, sent_id, POLL_LIMIT)
                .await
            {
                Ok(m) => m,
                Err(e) => return self.on_error(address, e).await,
            };
            messages.sort_by_key(|m| m.id);

            for msg in messages {
                if msg.outgoing || msg.id <= sent_id {
                    continue;
                }
                if is_placeholder(&msg.text, &command) {
                    debug!("[{address}] Skipping placeholder reply {}", msg.id);
                    continue;
                }
                if let Some(amount) = parse_amount(&msg.text) {
                    return BalanceOutcome::Ok { amount };
                }
                debug!("[{address}] No amount in reply {}", msg.id);
            }

            sleep(self.settings.step_wait).await;
        }

        warn!(
            "[{address}] No answer within {}s",
            self.settings.reply_timeout.as_secs()
        );
        BalanceOutcome::Timeout
    }

    async fn on_error(&self, address: &str, err: TransportError) -> BalanceOutcome {
        match err {
            TransportError::RateLimited { retry_after } => {
                warn!(
                    "[{address}] Rate limited, pausing {}s",
                    retry_after.as_secs()
                );
                sleep(retry_after).await;
                BalanceOutcome::RateLimited { retry_after }
            }
            other => {
                warn!("[{address}] Transport error: {other}");
                BalanceOutcome::TransportError {
                    detail: other.to_string(),
                }
            }
        }
    }

    /// Fetch every address of a group in order, pacing between requests.
    pub async fn fetch_group(&self, group: &OwnerGroup) -> GroupRows {
        info!("Fetching {} address(es) for {}", group.nodes.len(), group.owner);
        let mut rows = Vec::with_capacity(group.nodes.len());
        for node in &group.nodes {
            let outcome = self.ask_balance(&node.address).await;
            debug!("[{}] {outcome}", node.address);
            rows.push(BalanceRow {
                label: node.label.clone(),
                address: node.address.clone(),
                outcome,
            });
            sleep(self.settings.delay_between).await;
        }
        GroupRows {
            owner: group.owner.clone(),
            rows,
        }
    }
}
