//! Trade lifecycle controller
//!
//! The only writer of trade records. Every entry point takes the acting user,
//! checks authority against the stored trade, then performs one conditional
//! ledger write. Channel notices are sent after the write and never undo it:
//! a failed notice is logged, not surfaced.
//!
//! ```text
//! CREATED ──> AWAITING_ROLE ──> SENDER_CHOSEN ──┐
//!                         └──> RECEIVER_CHOSEN ─┴─> DEPOSIT_CONFIRMED ──> RELEASED
//! any non-terminal ──> CANCELLED
//! ```

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::actions::{legal_actions, ComponentAction};
use crate::escrow::activation::{ActivationStore, Activated};
use crate::escrow::fees::panel_description;
use crate::escrow::ledger::{TradeLedger, Transition, TransitionPatch};
use crate::escrow::types::{
    parse_user_reference, ChannelRef, Currency, NewTrade, Role, Trade, TradeForm, TradeId,
    TradeStatus, UserId,
};
use crate::transport::{ChatTransport, OutboundMessage};
use crate::wallet::AddressIssuer;

/// Why a trade is being cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// A party or the owner asked for it.
    Requested(UserId),
    /// No progress within the configured window.
    Timeout,
    /// The private channel could not be created.
    ProvisionFailed,
}

impl CancelReason {
    fn describe(&self, status: TradeStatus) -> String {
        match self {
            CancelReason::Requested(user) => format!("cancelled by {}", user.mention()),
            CancelReason::Timeout if status == TradeStatus::AwaitingRole => {
                "timed out waiting for a role choice".to_string()
            }
            CancelReason::Timeout if status.awaits_deposit() => {
                "timed out waiting for the deposit".to_string()
            }
            CancelReason::Timeout => "timed out".to_string(),
            CancelReason::ProvisionFailed => "channel provisioning failed".to_string(),
        }
    }
}

/// Result of a role button press by the counterparty.
#[derive(Debug, Clone)]
pub enum RoleOutcome {
    Chosen(Trade),
    /// Same choice pressed again after it was recorded.
    AlreadyChosen(Trade),
}

impl RoleOutcome {
    pub fn trade(&self) -> &Trade {
        match self {
            RoleOutcome::Chosen(t) | RoleOutcome::AlreadyChosen(t) => t,
        }
    }
}

/// Data behind the currency-selection panel.
#[derive(Debug, Clone)]
pub struct Panel {
    pub description: String,
    pub currencies: Vec<Currency>,
}

#[derive(Debug, Clone)]
pub struct ControllerPolicy {
    pub owner: Option<UserId>,
    /// Zero disables the timeout.
    pub role_timeout: Duration,
    pub deposit_timeout: Duration,
}

impl Default for ControllerPolicy {
    fn default() -> Self {
        Self {
            owner: None,
            role_timeout: Duration::hours(24),
            deposit_timeout: Duration::hours(24),
        }
    }
}

#[derive(Clone)]
pub struct TradeController {
    activation: ActivationStore,
    ledger: TradeLedger,
    issuer: AddressIssuer,
    transport: Arc<dyn ChatTransport>,
    policy: ControllerPolicy,
}

impl TradeController {
    pub fn new(
        activation: ActivationStore,
        ledger: TradeLedger,
        issuer: AddressIssuer,
        transport: Arc<dyn ChatTransport>,
        policy: ControllerPolicy,
    ) -> Self {
        Self {
            activation,
            ledger,
            issuer,
            transport,
            policy,
        }
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn issuer(&self) -> &AddressIssuer {
        &self.issuer
    }

    pub fn is_owner(&self, user: &UserId) -> bool {
        self.policy.owner.as_ref() == Some(user)
    }

    fn require_owner(&self, actor: &UserId) -> EscrowResult<()> {
        if self.is_owner(actor) {
            Ok(())
        } else {
            Err(EscrowError::NotAuthorized("owner only".into()))
        }
    }

    /// Activation gate; the owner bypasses it.
    pub fn check_access(&self, actor: &UserId) -> EscrowResult<()> {
        if self.is_owner(actor) || self.activation.is_activated(actor)? {
            Ok(())
        } else {
            Err(EscrowError::ActivationRequired)
        }
    }

    // ---- activation ---------------------------------------------------------

    pub fn generate_key(&self, actor: &UserId) -> EscrowResult<String> {
        self.require_owner(actor)?;
        self.activation.issue_key(Some(actor))
    }

    pub fn redeem_key(&self, actor: &UserId, code: &str) -> EscrowResult<Activated> {
        self.activation.redeem(code, actor)
    }

    // ---- entry protocol -----------------------------------------------------

    pub fn open_panel(&self, actor: &UserId) -> EscrowResult<Panel> {
        self.check_access(actor)?;
        Ok(Panel {
            description: panel_description(),
            currencies: Currency::ALL.to_vec(),
        })
    }

    /// A currency was picked on the panel; the form may be shown.
    pub fn begin_trade(&self, actor: &UserId, currency: Currency) -> EscrowResult<()> {
        self.check_access(actor)?;
        self.ensure_no_pending_deposit(actor)?;
        self.issuer.ensure_ready(currency)
    }

    /// An initiator may have only one trade waiting on its deposit.
    fn ensure_no_pending_deposit(&self, actor: &UserId) -> EscrowResult<()> {
        let open = self.ledger.list_for_user(actor, false)?;
        match open
            .iter()
            .find(|t| &t.initiator_id == actor && t.status.awaits_deposit())
        {
            Some(t) => Err(EscrowError::OpenTrade(t.id)),
            None => Ok(()),
        }
    }

    /// Form submitted: create the trade, its address and its private channel.
    pub async fn initiate(
        &self,
        actor: &UserId,
        currency: Currency,
        form: TradeForm,
    ) -> EscrowResult<Trade> {
        self.check_access(actor)?;
        form.validate()?;
        let expected_amount = form.expected_units(currency)?;
        self.ensure_no_pending_deposit(actor)?;

        let counterparty = parse_user_reference(&form.counterparty)
            .ok_or_else(|| EscrowError::not_found("user", form.counterparty.trim()))?;
        if &counterparty == actor {
            return Err(EscrowError::SelfTrade);
        }
        let counterparty = self
            .transport
            .resolve_user(&counterparty)
            .await?
            .ok_or_else(|| EscrowError::not_found("user", &counterparty))?;
        if &counterparty == actor {
            return Err(EscrowError::SelfTrade);
        }
        self.issuer.ensure_ready(currency)?;

        let new = NewTrade {
            initiator_id: actor.clone(),
            counterparty_id: counterparty.clone(),
            currency,
            initiator_gives: form.you_give.trim().to_string(),
            counterparty_gives: form.they_give.trim().to_string(),
            expected_amount,
        };
        let issuer = self.issuer.clone();
        let trade = self
            .ledger
            .create_with_address(&new, |id| issuer.derive_address(currency, id))?;
        info!(trade_id = trade.id, currency = %currency, "[TRADE] Created");

        let members = [actor.clone(), counterparty.clone()];
        let channel = match self
            .transport
            .create_private_channel(&format!("trade-{}", trade.id), &members)
            .await
        {
            Ok(ch) => ch,
            Err(e) => {
                warn!(trade_id = trade.id, "[TRADE] Channel provisioning failed: {}", e);
                self.abandon(trade.id, None).await;
                return Err(EscrowError::ChannelProvisionFailed(e));
            }
        };
        if let Err(e) = self.ledger.attach_channel(trade.id, &channel) {
            warn!(trade_id = trade.id, channel = %channel, "[TRADE] Channel binding failed: {}", e);
            self.abandon(trade.id, Some(&channel)).await;
            return Err(e);
        }

        let trade = match self.ledger.transition(
            trade.id,
            TradeStatus::Created,
            TradeStatus::AwaitingRole,
            TransitionPatch::default(),
        )? {
            Transition::Applied(t) => t,
            Transition::Stale(t) => {
                return Err(EscrowError::IllegalTransition {
                    from: t.status,
                    to: TradeStatus::AwaitingRole,
                })
            }
        };

        let intro = OutboundMessage::with_actions(intro_text(&trade), legal_actions(&trade));
        self.notify(&trade, intro).await;
        Ok(trade)
    }

    /// Cancel a trade whose setup failed and drop the channel made for it.
    async fn abandon(&self, trade_id: TradeId, channel: Option<&ChannelRef>) {
        if let Err(e) = self.cancel(trade_id, CancelReason::ProvisionFailed).await {
            warn!(trade_id, "[TRADE] Could not cancel orphaned trade: {}", e);
        }
        if let Some(channel) = channel {
            if let Err(e) = self.transport.close_channel(channel).await {
                warn!(trade_id, channel = %channel, "[TRADE] Could not remove orphaned channel: {}", e);
            }
        }
    }

    // ---- role selection -----------------------------------------------------

    pub async fn choose_role(
        &self,
        trade_id: TradeId,
        actor: &UserId,
        role: Role,
    ) -> EscrowResult<RoleOutcome> {
        let trade = self.ledger.get(trade_id)?;
        if actor != &trade.counterparty_id {
            return Err(EscrowError::NotAuthorized(format!(
                "only the counterparty of trade {} picks a role",
                trade_id
            )));
        }
        let target = role.target_status();
        let patch = TransitionPatch {
            counterparty_role: Some(role),
            ..Default::default()
        };
        match self
            .ledger
            .transition(trade_id, TradeStatus::AwaitingRole, target, patch)?
        {
            Transition::Applied(trade) => {
                info!(trade_id, role = role.as_str(), "[TRADE] Role chosen");
                let msg = OutboundMessage::with_actions(role_text(&trade), legal_actions(&trade));
                self.notify(&trade, msg).await;
                Ok(RoleOutcome::Chosen(trade))
            }
            Transition::Stale(current) if current.counterparty_role == Some(role) => {
                Ok(RoleOutcome::AlreadyChosen(current))
            }
            Transition::Stale(current) => Err(EscrowError::IllegalTransition {
                from: current.status,
                to: target,
            }),
        }
    }

    // ---- deposit ------------------------------------------------------------

    /// Called by the deposit monitor once a confirmed balance meets the
    /// threshold. Repeated calls for a funded trade are no-ops.
    pub async fn on_deposit_observed(&self, trade_id: TradeId, amount: u64) -> EscrowResult<Trade> {
        loop {
            let trade = self.ledger.get(trade_id)?;
            match trade.status {
                TradeStatus::DepositConfirmed | TradeStatus::Released => return Ok(trade),
                s if s.awaits_deposit() => {
                    let patch = TransitionPatch {
                        deposit_amount: Some(amount),
                        ..Default::default()
                    };
                    match self
                        .ledger
                        .transition(trade_id, s, TradeStatus::DepositConfirmed, patch)?
                    {
                        Transition::Applied(trade) => {
                            info!(trade_id, amount, "[TRADE] Deposit confirmed");
                            let msg = OutboundMessage::with_actions(
                                deposit_text(&trade),
                                legal_actions(&trade),
                            );
                            self.notify(&trade, msg).await;
                            return Ok(trade);
                        }
                        Transition::Stale(_) => continue,
                    }
                }
                from => {
                    return Err(EscrowError::IllegalTransition {
                        from,
                        to: TradeStatus::DepositConfirmed,
                    })
                }
            }
        }
    }

    /// Owner override for deposits no chain source can observe.
    pub async fn confirm_deposit_manually(
        &self,
        actor: &UserId,
        trade_id: TradeId,
        amount: u64,
    ) -> EscrowResult<Trade> {
        self.require_owner(actor)?;
        if amount == 0 {
            return Err(EscrowError::InvalidInput("Amount must be positive.".into()));
        }
        self.on_deposit_observed(trade_id, amount).await
    }

    /// Notice that funds are visible at the deposit address but the trade is
    /// not funded yet: either confirmations are missing or `seen` falls short
    /// of the escrow amount.
    pub async fn notify_deposit_pending(&self, trade: &Trade, seen: u64) {
        let currency = trade.currency;
        let text = if seen >= trade.expected_amount {
            format!(
                "Deposit of {} seen for trade #{}; waiting for confirmations.",
                currency.format_units(seen),
                trade.id
            )
        } else {
            format!(
                "Deposit of {} seen for trade #{}, but {} is expected. Send the remaining {} to `{}`.",
                currency.format_units(seen),
                trade.id,
                currency.format_units(trade.expected_amount),
                currency.format_units(trade.expected_amount - seen),
                trade.deposit_address.as_deref().unwrap_or("-"),
            )
        };
        self.notify(trade, OutboundMessage::text(text)).await;
    }

    // ---- release / cancel ---------------------------------------------------

    /// Release a funded trade. Allowed for the depositor and the owner.
    pub async fn release(
        &self,
        trade_id: TradeId,
        actor: &UserId,
        payout_address: Option<String>,
    ) -> EscrowResult<Trade> {
        let trade = self.ledger.get(trade_id)?;
        let is_depositor = trade.depositor() == Some(actor);
        if !is_depositor && !self.is_owner(actor) {
            return Err(EscrowError::NotAuthorized(format!(
                "only the depositor or the owner releases trade {}",
                trade_id
            )));
        }
        let payout_address = match payout_address.map(|a| a.trim().to_string()) {
            Some(a) if a.is_empty() || a.len() > 128 => {
                return Err(EscrowError::InvalidInput("Invalid payout address.".into()))
            }
            other => other,
        };
        let patch = TransitionPatch {
            released_by: Some(actor.clone()),
            payout_address,
            ..Default::default()
        };
        match self.ledger.transition(
            trade_id,
            TradeStatus::DepositConfirmed,
            TradeStatus::Released,
            patch,
        )? {
            Transition::Applied(trade) => {
                info!(trade_id, released_by = %actor, "[TRADE] Released");
                self.notify(&trade, OutboundMessage::text(release_text(&trade)))
                    .await;
                Ok(trade)
            }
            Transition::Stale(current) if current.status == TradeStatus::Released => Ok(current),
            Transition::Stale(current) => Err(EscrowError::IllegalTransition {
                from: current.status,
                to: TradeStatus::Released,
            }),
        }
    }

    /// Cancel a trade. Parties may cancel until the deposit is confirmed;
    /// afterwards only the owner can (refund path). Cancelling an already
    /// cancelled trade is a no-op.
    pub async fn cancel(&self, trade_id: TradeId, reason: CancelReason) -> EscrowResult<Trade> {
        loop {
            let trade = self.ledger.get(trade_id)?;
            match trade.status {
                TradeStatus::Cancelled => return Ok(trade),
                TradeStatus::Released => {
                    return Err(EscrowError::IllegalTransition {
                        from: TradeStatus::Released,
                        to: TradeStatus::Cancelled,
                    })
                }
                _ => {}
            }
            if let CancelReason::Requested(actor) = &reason {
                self.authorize_cancel(&trade, actor)?;
            }
            let patch = TransitionPatch {
                cancel_reason: Some(reason.describe(trade.status)),
                ..Default::default()
            };
            match self
                .ledger
                .transition(trade_id, trade.status, TradeStatus::Cancelled, patch)?
            {
                Transition::Applied(trade) => {
                    info!(trade_id, reason = ?reason, "[TRADE] Cancelled");
                    self.notify(&trade, OutboundMessage::text(cancel_text(&trade)))
                        .await;
                    return Ok(trade);
                }
                // state moved under us: re-check authority against the new state
                Transition::Stale(_) => continue,
            }
        }
    }

    fn authorize_cancel(&self, trade: &Trade, actor: &UserId) -> EscrowResult<()> {
        if self.is_owner(actor) {
            return Ok(());
        }
        if !trade.is_party(actor) {
            return Err(EscrowError::NotAuthorized(format!(
                "not a party to trade {}",
                trade.id
            )));
        }
        if trade.status == TradeStatus::DepositConfirmed {
            return Err(EscrowError::NotAuthorized(
                "funded trades can only be refunded by the owner".into(),
            ));
        }
        Ok(())
    }

    /// Cancel trades that sat too long waiting for a role or a deposit.
    /// Returns the ids that were cancelled by this sweep.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> EscrowResult<Vec<TradeId>> {
        let mut expired = Vec::new();
        let candidates = self.ledger.list_by_status(&[
            TradeStatus::Created,
            TradeStatus::AwaitingRole,
            TradeStatus::SenderChosen,
            TradeStatus::ReceiverChosen,
        ])?;
        for trade in candidates {
            let window = if trade.status.awaits_deposit() {
                self.policy.deposit_timeout
            } else {
                self.policy.role_timeout
            };
            if window <= Duration::zero() || trade.updated_at + window > now {
                continue;
            }
            let patch = TransitionPatch {
                cancel_reason: Some(CancelReason::Timeout.describe(trade.status)),
                ..Default::default()
            };
            // expected = the status we judged stale; anything newer wins
            if let Transition::Applied(t) =
                self.ledger
                    .transition(trade.id, trade.status, TradeStatus::Cancelled, patch)?
            {
                info!(trade_id = t.id, "[TRADE] Expired");
                self.notify(&t, OutboundMessage::text(cancel_text(&t))).await;
                expired.push(t.id);
            }
        }
        Ok(expired)
    }

    /// Owner cleanup: delete the private channel of a finished trade.
    pub async fn close_channel(&self, actor: &UserId, trade_id: TradeId) -> EscrowResult<Trade> {
        self.require_owner(actor)?;
        let trade = self.ledger.get(trade_id)?;
        if !trade.status.is_terminal() {
            return Err(EscrowError::InvalidInput(format!(
                "Trade #{} is still {}; release or cancel it first.",
                trade.id,
                trade.status.label()
            )));
        }
        let Some(channel) = trade.channel_ref.as_ref() else {
            return Err(EscrowError::InvalidInput(format!(
                "Trade #{} has no channel.",
                trade.id
            )));
        };
        self.transport.close_channel(channel).await?;
        info!(trade_id, channel = %channel, "[TRADE] Channel closed");
        Ok(trade)
    }

    // ---- queries ------------------------------------------------------------

    /// Caller's open trades with the controls they may use on each.
    pub fn status_for(&self, actor: &UserId) -> EscrowResult<Vec<(Trade, Vec<ComponentAction>)>> {
        let trades = self.ledger.list_for_user(actor, false)?;
        Ok(trades
            .into_iter()
            .map(|t| {
                let actions = self.actions_for(&t, actor);
                (t, actions)
            })
            .collect())
    }

    /// `legal_actions` narrowed to what `actor` is allowed to press.
    pub fn actions_for(&self, trade: &Trade, actor: &UserId) -> Vec<ComponentAction> {
        let owner = self.is_owner(actor);
        legal_actions(trade)
            .into_iter()
            .filter(|a| match a {
                ComponentAction::ChooseRole { .. } => actor == &trade.counterparty_id,
                ComponentAction::Release { .. } => owner || trade.depositor() == Some(actor),
                ComponentAction::Cancel { .. } => self.authorize_cancel(trade, actor).is_ok(),
                _ => false,
            })
            .collect()
    }

    async fn notify(&self, trade: &Trade, message: OutboundMessage) {
        let Some(channel) = trade.channel_ref.as_ref() else {
            return;
        };
        if let Err(e) = self.transport.send_to_channel(channel, message).await {
            warn!(trade_id = trade.id, "[TRADE] Channel notice failed: {}", e);
        }
    }
}

fn intro_text(trade: &Trade) -> String {
    format!(
        "**Trade #{id}** ({currency})\n\
         {initiator} gives: {igives}\n\
         {counterparty} gives: {cgives}\n\
         Escrow amount: {amount}\n\
         Escrow deposit address: `{address}`\n\n\
         {counterparty}, are you the **sender** (you deposit {currency}) or the **receiver**?",
        id = trade.id,
        currency = trade.currency.label(),
        initiator = trade.initiator_id.mention(),
        igives = trade.initiator_gives,
        counterparty = trade.counterparty_id.mention(),
        cgives = trade.counterparty_gives,
        amount = trade.currency.format_units(trade.expected_amount),
        address = trade.deposit_address.as_deref().unwrap_or("-"),
    )
}

fn role_text(trade: &Trade) -> String {
    let depositor = trade
        .depositor()
        .map(UserId::mention)
        .unwrap_or_else(|| "-".into());
    format!(
        "{} chose **{}**. {} please send {} to `{}`.",
        trade.counterparty_id.mention(),
        trade
            .counterparty_role
            .map(Role::as_str)
            .unwrap_or("a role"),
        depositor,
        trade.currency.format_units(trade.expected_amount),
        trade.deposit_address.as_deref().unwrap_or("-"),
    )
}

fn deposit_text(trade: &Trade) -> String {
    let amount = trade
        .deposit_amount
        .map(|a| trade.currency.format_units(a))
        .unwrap_or_else(|| "-".into());
    let depositor = trade
        .depositor()
        .map(UserId::mention)
        .unwrap_or_else(|| "The depositor".into());
    format!(
        "Deposit of {} confirmed for trade #{}. {} press **Release** once you have received your side.",
        amount, trade.id, depositor
    )
}

fn release_text(trade: &Trade) -> String {
    let mut text = format!("Trade #{} released", trade.id);
    if let Some(by) = &trade.released_by {
        text.push_str(&format!(" by {}", by.mention()));
    }
    if let Some(addr) = &trade.payout_address {
        text.push_str(&format!("; payout to `{}`", addr));
    }
    text.push('.');
    text
}

fn cancel_text(trade: &Trade) -> String {
    format!(
        "Trade #{} {}.",
        trade.id,
        trade.cancel_reason.as_deref().unwrap_or("cancelled")
    )
}
