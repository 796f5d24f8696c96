//! Slash command definitions and option parsing

use serde_json::{json, Value};

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::types::TradeId;

const OPT_STRING: u8 = 3;
const OPT_INTEGER: u8 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Panel,
    GenerateKey,
    RedeemKey { key: String },
    Status,
    Release { trade: TradeId, address: Option<String> },
    Cancel { trade: TradeId },
    ConfirmDeposit { trade: TradeId, amount: u64 },
    Close { trade: TradeId },
}

/// Payload for `PUT /applications/{app}/guilds/{guild}/commands`.
pub fn definitions() -> Value {
    let trade_opt = json!({
        "name": "trade", "description": "Trade number", "type": OPT_INTEGER,
        "required": true, "min_value": 1
    });
    json!([
        { "name": "panel", "description": "Post the middleman panel", "type": 1 },
        { "name": "generatekey", "description": "Create an activation key (owner)", "type": 1 },
        {
            "name": "redeemkey", "description": "Activate your account with a key", "type": 1,
            "options": [{ "name": "key", "description": "Activation key", "type": OPT_STRING, "required": true }]
        },
        { "name": "status", "description": "Show your open trades", "type": 1 },
        {
            "name": "release", "description": "Release a funded trade", "type": 1,
            "options": [
                trade_opt,
                { "name": "address", "description": "Payout address", "type": OPT_STRING, "required": false }
            ]
        },
        {
            "name": "cancel", "description": "Cancel a trade", "type": 1,
            "options": [trade_opt]
        },
        {
            "name": "confirmdeposit", "description": "Mark a deposit as received (owner)", "type": 1,
            "options": [
                trade_opt,
                {
                    "name": "amount", "description": "Amount in the smallest unit",
                    "type": OPT_INTEGER, "required": true, "min_value": 1
                }
            ]
        },
        {
            "name": "close", "description": "Delete a finished trade's channel (owner)", "type": 1,
            "options": [trade_opt]
        }
    ])
}

/// Parse `data` of an APPLICATION_COMMAND interaction.
pub fn parse(data: &Value) -> EscrowResult<Command> {
    let name = data.get("name").and_then(Value::as_str).unwrap_or_default();
    let options = data
        .get("options")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let opt = |key: &str| option_value(&options, key).cloned();
    let string_opt = |key: &str| opt(key).and_then(|v| v.as_str().map(str::to_string));
    let trade = || -> EscrowResult<TradeId> {
        opt("trade")
            .and_then(|v| v.as_i64())
            .filter(|id| *id > 0)
            .ok_or_else(|| EscrowError::InvalidInput("A trade number is required.".into()))
    };

    Ok(match name {
        "panel" => Command::Panel,
        "generatekey" => Command::GenerateKey,
        "redeemkey" => Command::RedeemKey {
            key: string_opt("key")
                .ok_or_else(|| EscrowError::InvalidInput("A key is required.".into()))?,
        },
        "status" => Command::Status,
        "release" => Command::Release {
            trade: trade()?,
            address: string_opt("address"),
        },
        "cancel" => Command::Cancel { trade: trade()? },
        "confirmdeposit" => Command::ConfirmDeposit {
            trade: trade()?,
            amount: opt("amount")
                .and_then(|v| v.as_u64())
                .filter(|a| *a > 0)
                .ok_or_else(|| EscrowError::InvalidInput("A positive amount is required.".into()))?,
        },
        "close" => Command::Close { trade: trade()? },
        other => {
            return Err(EscrowError::InvalidInput(format!(
                "Unknown command `{}`.",
                other
            )))
        }
    })
}

fn option_value<'a>(options: &'a [Value], key: &str) -> Option<&'a Value> {
    options
        .iter()
        .find(|o| o.get("name").and_then(Value::as_str) == Some(key))
        .and_then(|o| o.get("value"))
}
