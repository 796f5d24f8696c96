//! Data model shared by the ledger, the controller and the adapters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::EscrowError;

pub type TradeId = i64;
pub type ChannelRef = String;

/// Opaque chat-platform identity (a Discord snowflake in production).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse the free-text counterparty field: `<@123>`, `<@!123>` or a bare id.
pub fn parse_user_reference(input: &str) -> Option<UserId> {
    let s = input.trim();
    let inner = s
        .strip_prefix("<@")
        .and_then(|rest| rest.strip_suffix('>'))
        .map(|rest| rest.trim_start_matches('!'))
        .unwrap_or(s);
    if !inner.is_empty() && inner.len() <= 20 && inner.bytes().all(|b| b.is_ascii_digit()) {
        Some(UserId::new(inner))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Bitcoin,
    Litecoin,
    Solana,
    Ethereum,
    BnbSmartChain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "BTC")]
    Btc,
    #[serde(rename = "ETH")]
    Eth,
    #[serde(rename = "LTC")]
    Ltc,
    #[serde(rename = "SOL")]
    Sol,
    #[serde(rename = "USDT_ERC20")]
    UsdtErc20,
    #[serde(rename = "USDC_ERC20")]
    UsdcErc20,
    #[serde(rename = "USDT_SOL")]
    UsdtSol,
    #[serde(rename = "USDC_SOL")]
    UsdcSol,
    #[serde(rename = "USDT_BEP20")]
    UsdtBep20,
}

impl Currency {
    /// Panel order.
    pub const ALL: [Currency; 9] = [
        Currency::Btc,
        Currency::Eth,
        Currency::Ltc,
        Currency::Sol,
        Currency::UsdtErc20,
        Currency::UsdcErc20,
        Currency::UsdtSol,
        Currency::UsdcSol,
        Currency::UsdtBep20,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Eth => "ETH",
            Currency::Ltc => "LTC",
            Currency::Sol => "SOL",
            Currency::UsdtErc20 => "USDT_ERC20",
            Currency::UsdcErc20 => "USDC_ERC20",
            Currency::UsdtSol => "USDT_SOL",
            Currency::UsdcSol => "USDC_SOL",
            Currency::UsdtBep20 => "USDT_BEP20",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Currency::Btc => "Bitcoin",
            Currency::Eth => "Ethereum",
            Currency::Ltc => "Litecoin",
            Currency::Sol => "Solana",
            Currency::UsdtErc20 => "USDT [ERC-20]",
            Currency::UsdcErc20 => "USDC [ERC-20]",
            Currency::UsdtSol => "USDT [SOL]",
            Currency::UsdcSol => "USDC [SOL]",
            Currency::UsdtBep20 => "USDT [BEP-20]",
        }
    }

    pub fn network(self) -> Network {
        match self {
            Currency::Btc => Network::Bitcoin,
            Currency::Ltc => Network::Litecoin,
            Currency::Sol | Currency::UsdtSol | Currency::UsdcSol => Network::Solana,
            Currency::Eth | Currency::UsdtErc20 | Currency::UsdcErc20 => Network::Ethereum,
            Currency::UsdtBep20 => Network::BnbSmartChain,
        }
    }

    /// Decimal places of the smallest on-chain unit.
    pub fn decimals(self) -> u32 {
        match self {
            Currency::Btc | Currency::Ltc => 8,
            Currency::Sol => 9,
            Currency::Eth | Currency::UsdtBep20 => 18,
            Currency::UsdtErc20 | Currency::UsdcErc20 | Currency::UsdtSol | Currency::UsdcSol => 6,
        }
    }

    /// Render smallest-unit amounts, e.g. 150000000 sats -> "1.5 BTC".
    pub fn format_units(self, units: u64) -> String {
        let scale = 10u128.pow(self.decimals());
        let units = units as u128;
        let whole = units / scale;
        let frac = units % scale;
        if frac == 0 {
            return format!("{} {}", whole, self.code());
        }
        let frac = format!("{:0width$}", frac, width = self.decimals() as usize);
        format!("{}.{} {}", whole, frac.trim_end_matches('0'), self.code())
    }

    /// Parse a decimal amount such as "0.5" or "0.5 LTC" into smallest units.
    /// Zero, negative, over-precise and overflowing values give `None`.
    pub fn parse_units(self, input: &str) -> Option<u64> {
        let s = input.trim();
        let code = self.code();
        let s = match s.len().checked_sub(code.len()) {
            Some(cut) if s.is_char_boundary(cut) && s[cut..].eq_ignore_ascii_case(code) => {
                s[..cut].trim_end()
            }
            _ => s,
        };
        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        let places = self.decimals() as usize;
        if (whole.is_empty() && frac.is_empty())
            || !digits(whole)
            || !digits(frac)
            || frac.len() > places
        {
            return None;
        }
        let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let frac: u64 = if frac.is_empty() {
            0
        } else {
            format!("{:0<width$}", frac, width = places).parse().ok()?
        };
        let units = whole
            .checked_mul(10u64.checked_pow(self.decimals())?)?
            .checked_add(frac)?;
        (units > 0).then_some(units)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Currency {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Currency::ALL
            .iter()
            .copied()
            .find(|c| c.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| EscrowError::InvalidInput(format!("Unknown currency `{}`.", wanted)))
    }
}

/// Canonical lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Created,
    AwaitingRole,
    SenderChosen,
    ReceiverChosen,
    DepositConfirmed,
    Released,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Created => "created",
            TradeStatus::AwaitingRole => "awaiting_role",
            TradeStatus::SenderChosen => "sender_chosen",
            TradeStatus::ReceiverChosen => "receiver_chosen",
            TradeStatus::DepositConfirmed => "deposit_confirmed",
            TradeStatus::Released => "released",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "created" => TradeStatus::Created,
            "awaiting_role" => TradeStatus::AwaitingRole,
            "sender_chosen" => TradeStatus::SenderChosen,
            "receiver_chosen" => TradeStatus::ReceiverChosen,
            "deposit_confirmed" => TradeStatus::DepositConfirmed,
            "released" => TradeStatus::Released,
            "cancelled" => TradeStatus::Cancelled,
            _ => return None,
        })
    }

    pub fn label(self) -> &'static str {
        match self {
            TradeStatus::Created => "being set up",
            TradeStatus::AwaitingRole => "waiting for a role choice",
            TradeStatus::SenderChosen | TradeStatus::ReceiverChosen => "waiting for the deposit",
            TradeStatus::DepositConfirmed => "funded",
            TradeStatus::Released => "released",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TradeStatus::Released | TradeStatus::Cancelled)
    }

    /// Trades whose deposit address the monitor should watch.
    pub fn awaits_deposit(self) -> bool {
        matches!(self, TradeStatus::SenderChosen | TradeStatus::ReceiverChosen)
    }

    /// The legal-transition table. Nothing else may be written to a trade's status.
    pub fn can_transition_to(self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        match (self, next) {
            (Created, AwaitingRole) => true,
            (AwaitingRole, SenderChosen) | (AwaitingRole, ReceiverChosen) => true,
            (SenderChosen, DepositConfirmed) | (ReceiverChosen, DepositConfirmed) => true,
            (DepositConfirmed, Released) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role picked by the counterparty for themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Receiver => "receiver",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sender" => Some(Role::Sender),
            "receiver" => Some(Role::Receiver),
            _ => None,
        }
    }

    pub fn target_status(self) -> TradeStatus {
        match self {
            Role::Sender => TradeStatus::SenderChosen,
            Role::Receiver => TradeStatus::ReceiverChosen,
        }
    }
}

/// The free-text fields of the trade form, submitted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeForm {
    pub counterparty: String,
    pub you_give: String,
    pub they_give: String,
    /// Amount of the selected currency that must reach the deposit address.
    pub amount: String,
}

impl TradeForm {
    pub const MAX_FIELD_LEN: usize = 200;

    pub fn validate(&self) -> Result<(), EscrowError> {
        for (name, value) in [
            ("Other user", &self.counterparty),
            ("You give", &self.you_give),
            ("They give", &self.they_give),
            ("Escrow amount", &self.amount),
        ] {
            let v = value.trim();
            if v.is_empty() {
                return Err(EscrowError::InvalidInput(format!("{} is required.", name)));
            }
            if v.chars().count() > Self::MAX_FIELD_LEN {
                return Err(EscrowError::InvalidInput(format!(
                    "{} is longer than {} characters.",
                    name,
                    Self::MAX_FIELD_LEN
                )));
            }
        }
        Ok(())
    }

    /// Escrow amount in `currency`'s smallest unit.
    pub fn expected_units(&self, currency: Currency) -> Result<u64, EscrowError> {
        currency.parse_units(&self.amount).ok_or_else(|| {
            EscrowError::InvalidInput(format!(
                "Escrow amount must be a positive {} amount with at most {} decimals.",
                currency.code(),
                currency.decimals()
            ))
        })
    }
}

/// Insert payload for the ledger.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub initiator_id: UserId,
    pub counterparty_id: UserId,
    pub currency: Currency,
    pub initiator_gives: String,
    pub counterparty_gives: String,
    pub expected_amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    pub id: TradeId,
    pub initiator_id: UserId,
    pub counterparty_id: UserId,
    pub currency: Currency,
    pub initiator_gives: String,
    pub counterparty_gives: String,
    /// Amount the depositor must send, in the network's smallest unit.
    pub expected_amount: u64,
    pub deposit_address: Option<String>,
    pub channel_ref: Option<ChannelRef>,
    pub status: TradeStatus,
    pub counterparty_role: Option<Role>,
    /// Confirmed amount in the network's smallest unit, set on deposit confirmation.
    pub deposit_amount: Option<u64>,
    pub released_by: Option<UserId>,
    pub payout_address: Option<String>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_party(&self, user: &UserId) -> bool {
        &self.initiator_id == user || &self.counterparty_id == user
    }

    /// Party holding the "sender" role, i.e. the one funding the escrow.
    pub fn depositor(&self) -> Option<&UserId> {
        match self.counterparty_role? {
            Role::Sender => Some(&self.counterparty_id),
            Role::Receiver => Some(&self.initiator_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_reference_forms() {
        assert_eq!(parse_user_reference("<@123>"), Some(UserId::new("123")));
        assert_eq!(parse_user_reference(" <@!456> "), Some(UserId::new("456")));
        assert_eq!(parse_user_reference("789"), Some(UserId::new("789")));
        assert_eq!(parse_user_reference("@bob"), None);
        assert_eq!(parse_user_reference("<@>"), None);
        assert_eq!(parse_user_reference(""), None);
    }

    #[test]
    fn transition_table_edges() {
        use TradeStatus::*;
        let all = [
            Created,
            AwaitingRole,
            SenderChosen,
            ReceiverChosen,
            DepositConfirmed,
            Released,
            Cancelled,
        ];
        let legal = [
            (Created, AwaitingRole),
            (AwaitingRole, SenderChosen),
            (AwaitingRole, ReceiverChosen),
            (SenderChosen, DepositConfirmed),
            (ReceiverChosen, DepositConfirmed),
            (DepositConfirmed, Released),
            (Created, Cancelled),
            (AwaitingRole, Cancelled),
            (SenderChosen, Cancelled),
            (ReceiverChosen, Cancelled),
            (DepositConfirmed, Cancelled),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    legal.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn status_strings_round_trip_through_storage_form() {
        for s in [
            TradeStatus::Created,
            TradeStatus::AwaitingRole,
            TradeStatus::DepositConfirmed,
            TradeStatus::Cancelled,
        ] {
            assert_eq!(TradeStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TradeStatus::parse("waiting_deposit"), None);
    }

    #[test]
    fn currency_codes_parse_case_insensitively() {
        assert_eq!("ltc".parse::<Currency>().unwrap(), Currency::Ltc);
        assert_eq!("USDT_SOL".parse::<Currency>().unwrap(), Currency::UsdtSol);
        assert!("DOGE".parse::<Currency>().is_err());
        assert_eq!(Currency::UsdcSol.network(), Network::Solana);
        assert_eq!(Currency::UsdtBep20.network(), Network::BnbSmartChain);
    }

    #[test]
    fn unit_formatting() {
        assert_eq!(Currency::Btc.format_units(150_000_000), "1.5 BTC");
        assert_eq!(Currency::Ltc.format_units(1), "0.00000001 LTC");
        assert_eq!(Currency::Sol.format_units(2_000_000_000), "2 SOL");
        assert_eq!(Currency::UsdtSol.format_units(12_340_000), "12.34 USDT_SOL");
    }

    #[test]
    fn amounts_parse_to_smallest_units() {
        assert_eq!(Currency::Ltc.parse_units("0.5"), Some(50_000_000));
        assert_eq!(Currency::Ltc.parse_units(" 0.5 ltc "), Some(50_000_000));
        assert_eq!(Currency::Btc.parse_units(".00000001"), Some(1));
        assert_eq!(Currency::Sol.parse_units("2"), Some(2_000_000_000));
        assert_eq!(Currency::UsdtSol.parse_units("12.34 USDT_SOL"), Some(12_340_000));
        for bad in ["", "0", "0.000", "-1", "1.2.3", "abc", "1e5", ".", "0.000000001"] {
            assert_eq!(Currency::Btc.parse_units(bad), None, "{:?}", bad);
        }
        // 19 ETH does not fit in u64 wei
        assert_eq!(Currency::Eth.parse_units("19"), None);
        assert_eq!(Currency::Eth.parse_units("18"), Some(18_000_000_000_000_000_000));
    }

    #[test]
    fn form_rejects_blank_fields() {
        let form = TradeForm {
            counterparty: "<@1>".into(),
            you_give: "  ".into(),
            they_give: "0.5 LTC".into(),
            amount: "0.5".into(),
        };
        assert!(matches!(form.validate(), Err(EscrowError::InvalidInput(_))));
        let form = TradeForm {
            you_give: "gift card".into(),
            amount: " ".into(),
            ..form
        };
        assert!(matches!(form.validate(), Err(EscrowError::InvalidInput(_))));
    }
}
