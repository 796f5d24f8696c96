//! Domain-specific error types for the escrow bot
//!
//! Every failure of a single user interaction is one of these variants and is
//! reported back to the acting user as a private notice.

use thiserror::Error;

use crate::escrow::types::{Currency, TradeId, TradeStatus};

/// Failures raised by the chat platform adapter
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected platform payload: {0}")]
    Decode(String),
}

/// Failures raised by a chain-data source
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("no chain source watches {0} deposits")]
    Unsupported(Currency),

    #[error("chain API request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("chain API returned {status}")]
    Status { status: u16 },

    #[error("malformed chain API response: {0}")]
    Malformed(String),
}

/// Trade lifecycle, activation and wallet errors
#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },

    #[error("activation key already used")]
    AlreadyUsed,

    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("activation required")]
    ActivationRequired,

    #[error("cannot open a trade with yourself")]
    SelfTrade,

    #[error("trade {0} is still waiting for its deposit")]
    OpenTrade(TradeId),

    #[error("illegal transition: {from} -> {to}")]
    IllegalTransition { from: TradeStatus, to: TradeStatus },

    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    #[error("{0} deposits cannot be derived by the configured wallet")]
    UnsupportedCurrency(Currency),

    #[error("channel provisioning failed: {0}")]
    ChannelProvisionFailed(#[source] TransportError),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl EscrowError {
    pub fn not_found(what: &'static str, key: impl ToString) -> Self {
        EscrowError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    /// Short private notice shown to the user whose interaction failed
    pub fn user_notice(&self) -> String {
        match self {
            EscrowError::NotFound { what, .. } if *what == "activation key" => {
                "Invalid key.".to_string()
            }
            EscrowError::NotFound { what, .. } if *what == "user" => "Invalid user.".to_string(),
            EscrowError::NotFound { what, key } => format!("No {} found for `{}`.", what, key),
            EscrowError::AlreadyUsed => "Already used.".to_string(),
            EscrowError::NotAuthorized(_) => "Not for you.".to_string(),
            EscrowError::ActivationRequired => "Activate with a key first.".to_string(),
            EscrowError::SelfTrade => "Can't trade with self.".to_string(),
            EscrowError::OpenTrade(id) => format!(
                "You already have trade #{} waiting for its deposit. Complete or cancel it first.",
                id
            ),
            EscrowError::IllegalTransition { from, .. } => {
                format!("That action is no longer available (trade is {}).", from.label())
            }
            EscrowError::WalletUnavailable(_) => {
                "Escrow wallet is not configured; trading is disabled.".to_string()
            }
            EscrowError::UnsupportedCurrency(c) => {
                format!("{} escrow is not available yet.", c.label())
            }
            EscrowError::ChannelProvisionFailed(_) => {
                "Could not create the trade channel; the trade was cancelled.".to_string()
            }
            EscrowError::InvalidInput(msg) => msg.clone(),
            EscrowError::Transport(_) | EscrowError::Storage(_) | EscrowError::Corrupt(_) => {
                "Something went wrong, please try again.".to_string()
            }
        }
    }
}

pub type EscrowResult<T> = Result<T, EscrowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_do_not_leak_internals() {
        let err = EscrowError::Corrupt("status column = 'bogus'".into());
        assert!(!err.user_notice().contains("bogus"));

        let err = EscrowError::WalletUnavailable("BOT_MNEMONIC missing".into());
        assert!(!err.user_notice().contains("BOT_MNEMONIC"));
    }

    #[test]
    fn not_found_notice_names_the_record() {
        assert_eq!(
            EscrowError::not_found("activation key", "ABC").user_notice(),
            "Invalid key."
        );
        assert_eq!(
            EscrowError::not_found("trade", 42).user_notice(),
            "No trade found for `42`."
        );
    }
}
