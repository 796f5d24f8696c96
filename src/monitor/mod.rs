//! Deposit monitor
//!
//! Polls a chain source for every trade waiting on its deposit and hands
//! confirmed balances that cover the escrow amount to the controller. The same
//! loop runs the timeout sweep.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::errors::{ChainError, EscrowError, EscrowResult};
use crate::escrow::lifecycle::TradeController;
use crate::escrow::types::{Currency, TradeId, TradeStatus};
use crate::util::LogThrottle;

pub mod blockchair;
pub mod solana;

pub use blockchair::BlockchairSource;
pub use solana::SolanaRpcSource;

/// Backoff ceiling after failed cycles.
pub const MAX_BACKOFF_SECS: u64 = 300;

/// Balance at an address in the currency's smallest unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceReport {
    /// Funds with at least the configured number of confirmations.
    pub confirmed: u64,
    /// Funds seen on chain (or in the mempool) but not yet confirmed enough.
    pub pending: u64,
}

impl BalanceReport {
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.pending)
    }
}

#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn check_balance(
        &self,
        address: &str,
        currency: Currency,
    ) -> Result<BalanceReport, ChainError>;
}

/// Dispatches each currency to the source that can observe it.
#[derive(Default)]
pub struct ChainRouter {
    pub blockchair: Option<BlockchairSource>,
    pub solana: Option<SolanaRpcSource>,
}

#[async_trait]
impl ChainSource for ChainRouter {
    async fn check_balance(
        &self,
        address: &str,
        currency: Currency,
    ) -> Result<BalanceReport, ChainError> {
        match (currency, &self.blockchair, &self.solana) {
            (Currency::Btc | Currency::Ltc, Some(bc), _) => bc.check_balance(address, currency).await,
            (Currency::Sol, _, Some(sol)) => sol.check_balance(address, currency).await,
            _ => Err(ChainError::Unsupported(currency)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_secs: u64,
    /// Floor under every trade's escrow amount.
    pub min_deposit_units: u64,
}

/// What one sweep did; used for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub checked: usize,
    pub confirmed: Vec<TradeId>,
    pub pending_notices: Vec<TradeId>,
    pub expired: Vec<TradeId>,
    pub errors: usize,
}

pub struct DepositMonitor {
    controller: TradeController,
    source: Arc<dyn ChainSource>,
    settings: MonitorSettings,
    throttle: LogThrottle,
    /// Balance last announced per unfunded trade, so a notice goes out only
    /// when the seen amount changes.
    pending_notified: Mutex<HashMap<TradeId, u64>>,
}

impl DepositMonitor {
    pub fn new(
        controller: TradeController,
        source: Arc<dyn ChainSource>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            controller,
            source,
            settings,
            throttle: LogThrottle::new(),
            pending_notified: Mutex::new(HashMap::new()),
        }
    }

    /// Trades with an outstanding pending-deposit notice.
    pub fn tracked_notices(&self) -> usize {
        self.pending_notified.lock().len()
    }

    /// Poll until shutdown. The first cycle runs immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let poll = self.settings.poll_secs.max(1);
        let ceiling = MAX_BACKOFF_SECS.max(poll);
        let mut backoff = poll;
        info!(poll_secs = poll, "[MONITOR] Deposit monitor started");
        loop {
            let healthy = match self.one_cycle().await {
                Ok(report) => {
                    if report.checked > 0 || !report.expired.is_empty() {
                        debug!(?report, "[MONITOR] cycle done");
                    }
                    report.errors == 0
                }
                Err(e) => {
                    warn!("[MONITOR] cycle failed: {}", e);
                    false
                }
            };
            backoff = if healthy {
                poll
            } else {
                (backoff * 2).min(ceiling)
            };
            tokio::select! {
                _ = sleep(Duration::from_secs(backoff)) => {}
                _ = shutdown.recv() => {
                    info!("[MONITOR] Shutdown signal received, stopping");
                    return;
                }
            }
        }
    }

    pub async fn one_cycle(&self) -> EscrowResult<CycleReport> {
        let mut report = CycleReport::default();
        let waiting = self
            .controller
            .ledger()
            .list_by_status(&[TradeStatus::SenderChosen, TradeStatus::ReceiverChosen])?;
        // trades cancelled or funded elsewhere drop their notice state
        self.pending_notified
            .lock()
            .retain(|id, _| waiting.iter().any(|t| t.id == *id));

        for trade in waiting {
            let Some(address) = trade.deposit_address.as_deref() else {
                warn!(trade_id = trade.id, "[MONITOR] trade has no deposit address");
                continue;
            };
            let balance = match self.source.check_balance(address, trade.currency).await {
                Ok(b) => b,
                Err(ChainError::Unsupported(c)) => {
                    // token deposits are confirmed by the owner
                    debug!(trade_id = trade.id, currency = %c, "[MONITOR] no chain source");
                    continue;
                }
                Err(e) => {
                    report.errors += 1;
                    self.throttle.warn(
                        &format!("{}:{}", trade.currency, address),
                        Duration::from_secs(600),
                        format!("[MONITOR] balance check for trade {} failed: {}", trade.id, e),
                    );
                    continue;
                }
            };
            report.checked += 1;

            let required = trade.expected_amount.max(self.settings.min_deposit_units);
            if balance.confirmed >= required {
                match self
                    .controller
                    .on_deposit_observed(trade.id, balance.confirmed)
                    .await
                {
                    Ok(_) => {
                        self.pending_notified.lock().remove(&trade.id);
                        report.confirmed.push(trade.id);
                    }
                    Err(EscrowError::IllegalTransition { from, .. }) if from.is_terminal() => {
                        debug!(trade_id = trade.id, status = %from, "[MONITOR] trade closed during the check");
                    }
                    Err(e) => {
                        report.errors += 1;
                        warn!(trade_id = trade.id, "[MONITOR] could not record deposit: {}", e);
                    }
                }
                continue;
            }
            // short or unconfirmed: tell the channel whenever the seen amount moves
            let seen = balance.total();
            let changed =
                seen > 0 && self.pending_notified.lock().insert(trade.id, seen) != Some(seen);
            if changed {
                self.controller.notify_deposit_pending(&trade, seen).await;
                report.pending_notices.push(trade.id);
            }
        }

        report.expired = match self.controller.expire_stale(Utc::now()).await {
            Ok(ids) => ids,
            Err(e) => {
                report.errors += 1;
                warn!("[MONITOR] timeout sweep failed: {}", e);
                Vec::new()
            }
        };
        if !report.expired.is_empty() {
            let mut seen = self.pending_notified.lock();
            for id in &report.expired {
                seen.remove(id);
            }
        }
        self.throttle.prune(Duration::from_secs(3_600));
        Ok(report)
    }
}
