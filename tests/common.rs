#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::Level;

use escrow_bot::errors::{ChainError, TransportError};
use escrow_bot::escrow::lifecycle::ControllerPolicy;
use escrow_bot::escrow::types::{ChannelRef, Currency, TradeForm, UserId};
use escrow_bot::escrow::{ActivationStore, TradeController, TradeLedger};
use escrow_bot::monitor::{BalanceReport, ChainSource};
use escrow_bot::store::Store;
use escrow_bot::transport::{ChatTransport, OutboundMessage};
use escrow_bot::wallet::AddressIssuer;

pub const ABANDON: &str = "abandon abandon abandon abandon abandon abandon \
                           abandon abandon abandon abandon abandon about";

pub const OWNER: &str = "1000";
pub const ALICE: &str = "1001";
pub const BOB: &str = "1002";
pub const CAROL: &str = "1003";

pub fn init_test_tracing() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .with_test_writer()
            .try_init();
    });
}

pub fn uid(id: &str) -> UserId {
    UserId::new(id)
}

/// In-memory stand-in for the chat platform that records every call.
#[derive(Default)]
pub struct RecordingTransport {
    known: Mutex<HashSet<String>>,
    next_channel: AtomicU64,
    pub fail_channels: AtomicBool,
    pub channels: Mutex<Vec<(ChannelRef, String, Vec<UserId>)>>,
    pub sent: Mutex<Vec<(ChannelRef, OutboundMessage)>>,
    pub closed: Mutex<Vec<ChannelRef>>,
}

impl RecordingTransport {
    pub fn with_users(ids: &[&str]) -> Arc<Self> {
        let t = Self::default();
        t.next_channel.store(5_000, Ordering::SeqCst);
        t.known.lock().extend(ids.iter().map(|s| s.to_string()));
        Arc::new(t)
    }

    pub fn sent_to(&self, channel: &str) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn resolve_user(&self, user: &UserId) -> Result<Option<UserId>, TransportError> {
        Ok(self
            .known
            .lock()
            .contains(user.as_str())
            .then(|| user.clone()))
    }

    async fn create_private_channel(
        &self,
        name: &str,
        members: &[UserId],
    ) -> Result<ChannelRef, TransportError> {
        if self.fail_channels.load(Ordering::SeqCst) {
            return Err(TransportError::Status {
                status: 403,
                body: "Missing Permissions".into(),
            });
        }
        let id = self.next_channel.fetch_add(1, Ordering::SeqCst).to_string();
        self.channels
            .lock()
            .push((id.clone(), name.to_string(), members.to_vec()));
        Ok(id)
    }

    async fn send_to_channel(
        &self,
        channel: &ChannelRef,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        self.sent.lock().push((channel.clone(), message));
        Ok(())
    }

    async fn close_channel(&self, channel: &ChannelRef) -> Result<(), TransportError> {
        self.closed.lock().push(channel.clone());
        Ok(())
    }
}

/// Chain source answering from a map; unknown addresses have zero balance.
#[derive(Default)]
pub struct FakeChain {
    pub balances: Mutex<HashMap<String, BalanceReport>>,
    pub failing: AtomicBool,
    pub calls: AtomicU64,
}

impl FakeChain {
    pub fn set(&self, address: &str, confirmed: u64, pending: u64) {
        self.balances
            .lock()
            .insert(address.to_string(), BalanceReport { confirmed, pending });
    }
}

#[async_trait]
impl ChainSource for FakeChain {
    async fn check_balance(
        &self,
        address: &str,
        currency: Currency,
    ) -> Result<BalanceReport, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !matches!(currency, Currency::Btc | Currency::Ltc | Currency::Sol) {
            return Err(ChainError::Unsupported(currency));
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChainError::Status { status: 503 });
        }
        Ok(self
            .balances
            .lock()
            .get(address)
            .copied()
            .unwrap_or_default())
    }
}

pub struct Harness {
    pub store: Store,
    pub transport: Arc<RecordingTransport>,
    pub controller: TradeController,
    pub activation: ActivationStore,
}

pub fn harness_with(store: Store, issuer: AddressIssuer, policy: ControllerPolicy) -> Harness {
    init_test_tracing();
    let transport = RecordingTransport::with_users(&[OWNER, ALICE, BOB, CAROL]);
    let activation = ActivationStore::new(store.clone());
    let controller = TradeController::new(
        activation.clone(),
        TradeLedger::new(store.clone()),
        issuer,
        transport.clone(),
        policy,
    );
    Harness {
        store,
        transport,
        controller,
        activation,
    }
}

pub fn owner_policy() -> ControllerPolicy {
    ControllerPolicy {
        owner: Some(uid(OWNER)),
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    let issuer = AddressIssuer::from_mnemonic(ABANDON).expect("test mnemonic");
    harness_with(Store::open_in_memory().expect("store"), issuer, owner_policy())
}

impl Harness {
    /// Issue and redeem a key for `user`.
    pub fn activate(&self, user: &str) {
        let key = self.activation.issue_key(None).expect("issue");
        self.activation.redeem(&key, &uid(user)).expect("redeem");
    }
}

/// Escrow amount used by `form`: 0.001 of the coin, i.e. 100 000 sats.
pub const FORM_AMOUNT: &str = "0.001";

pub fn form(counterparty: &str) -> TradeForm {
    TradeForm {
        counterparty: counterparty.to_string(),
        you_give: "0.001 LTC".into(),
        they_give: "$40 gift card".into(),
        amount: FORM_AMOUNT.into(),
    }
}
