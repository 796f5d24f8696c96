//! Escrow core: activation keys, the trade ledger and the lifecycle controller

pub mod actions;
pub mod activation;
pub mod fees;
pub mod ledger;
pub mod lifecycle;
pub mod types;

pub use actions::{legal_actions, ComponentAction};
pub use activation::ActivationStore;
pub use ledger::{TradeLedger, Transition, TransitionPatch};
pub use lifecycle::{CancelReason, RoleOutcome, TradeController};
pub use types::{Currency, Network, NewTrade, Role, Trade, TradeForm, TradeId, TradeStatus, UserId};
