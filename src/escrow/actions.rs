//! Interactive component identities
//!
//! Every button/select/modal the bot sends carries a `custom_id` that encodes
//! the action and, where relevant, the trade id. Nothing about a control lives
//! in memory: after a restart the id is parsed and re-validated against the
//! ledger, and `legal_actions` rebuilds the control set from stored status.

use std::fmt;
use std::str::FromStr;

use crate::escrow::types::{Currency, Role, Trade, TradeId, TradeStatus};

const PREFIX: &str = "mm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentAction {
    /// Currency select menu on the panel.
    SelectCurrency,
    /// Trade-details modal opened for a currency.
    TradeForm(Currency),
    ChooseRole { trade: TradeId, role: Role },
    Release { trade: TradeId },
    Cancel { trade: TradeId },
}

impl ComponentAction {
    pub fn trade_id(&self) -> Option<TradeId> {
        match self {
            ComponentAction::ChooseRole { trade, .. }
            | ComponentAction::Release { trade }
            | ComponentAction::Cancel { trade } => Some(*trade),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ComponentAction::SelectCurrency => "Select a currency",
            ComponentAction::TradeForm(_) => "Trade Details",
            ComponentAction::ChooseRole {
                role: Role::Sender, ..
            } => "Sender",
            ComponentAction::ChooseRole {
                role: Role::Receiver,
                ..
            } => "Receiver",
            ComponentAction::Release { .. } => "Release",
            ComponentAction::Cancel { .. } => "Cancel",
        }
    }
}

impl fmt::Display for ComponentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentAction::SelectCurrency => write!(f, "{}:panel", PREFIX),
            ComponentAction::TradeForm(c) => write!(f, "{}:form:{}", PREFIX, c.code()),
            ComponentAction::ChooseRole { trade, role } => {
                write!(f, "{}:role:{}:{}", PREFIX, trade, role.as_str())
            }
            ComponentAction::Release { trade } => write!(f, "{}:release:{}", PREFIX, trade),
            ComponentAction::Cancel { trade } => write!(f, "{}:cancel:{}", PREFIX, trade),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownComponent(pub String);

impl fmt::Display for UnknownComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown component id `{}`", self.0)
    }
}

impl std::error::Error for UnknownComponent {}

impl FromStr for ComponentAction {
    type Err = UnknownComponent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownComponent(s.to_string());
        let mut parts = s.split(':');
        if parts.next() != Some(PREFIX) {
            return Err(unknown());
        }
        let kind = parts.next().ok_or_else(unknown)?;
        let rest: Vec<&str> = parts.collect();
        let trade_id = |raw: &str| raw.parse::<TradeId>().ok().filter(|id| *id > 0);

        let action = match (kind, rest.as_slice()) {
            ("panel", []) => ComponentAction::SelectCurrency,
            ("form", [code]) => {
                ComponentAction::TradeForm(code.parse::<Currency>().map_err(|_| unknown())?)
            }
            ("role", [id, role]) => ComponentAction::ChooseRole {
                trade: trade_id(*id).ok_or_else(unknown)?,
                role: Role::parse(role).ok_or_else(unknown)?,
            },
            ("release", [id]) => ComponentAction::Release {
                trade: trade_id(*id).ok_or_else(unknown)?,
            },
            ("cancel", [id]) => ComponentAction::Cancel {
                trade: trade_id(*id).ok_or_else(unknown)?,
            },
            _ => return Err(unknown()),
        };
        Ok(action)
    }
}

/// Controls that are valid for a trade in its current stored state.
pub fn legal_actions(trade: &Trade) -> Vec<ComponentAction> {
    let id = trade.id;
    match trade.status {
        TradeStatus::AwaitingRole => vec![
            ComponentAction::ChooseRole {
                trade: id,
                role: Role::Sender,
            },
            ComponentAction::ChooseRole {
                trade: id,
                role: Role::Receiver,
            },
            ComponentAction::Cancel { trade: id },
        ],
        TradeStatus::SenderChosen | TradeStatus::ReceiverChosen => {
            vec![ComponentAction::Cancel { trade: id }]
        }
        TradeStatus::DepositConfirmed => vec![ComponentAction::Release { trade: id }],
        TradeStatus::Created | TradeStatus::Released | TradeStatus::Cancelled => Vec::new(),
    }
}
