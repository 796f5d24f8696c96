//! Process-wide handles, built once in `main` and cloned into each task.

use chrono::Duration;
use std::sync::Arc;

use crate::config::ResolvedConfig;
use crate::escrow::lifecycle::ControllerPolicy;
use crate::escrow::types::UserId;
use crate::escrow::{ActivationStore, TradeController, TradeLedger};
use crate::store::Store;
use crate::transport::ChatTransport;
use crate::wallet::AddressIssuer;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ResolvedConfig>,
    pub controller: TradeController,
}

impl AppContext {
    pub fn new(
        config: ResolvedConfig,
        store: Store,
        issuer: AddressIssuer,
        transport: Arc<dyn ChatTransport>,
    ) -> Self {
        let policy = policy_from(&config);
        let controller = TradeController::new(
            ActivationStore::new(store.clone()),
            TradeLedger::new(store),
            issuer,
            transport,
            policy,
        );
        Self {
            config: Arc::new(config),
            controller,
        }
    }
}

/// Longest timeout honoured; larger values are clamped.
const MAX_TIMEOUT_SECS: u64 = 3_650 * 86_400;

pub fn policy_from(config: &ResolvedConfig) -> ControllerPolicy {
    let secs = |v: u64| Duration::seconds(v.min(MAX_TIMEOUT_SECS) as i64);
    ControllerPolicy {
        owner: config.owner_id.clone().map(UserId),
        role_timeout: secs(config.role_timeout_secs),
        deposit_timeout: secs(config.deposit_timeout_secs),
    }
}
