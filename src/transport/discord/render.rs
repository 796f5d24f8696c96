//! Interaction responses and message components as Discord JSON

use serde_json::{json, Value};

use crate::escrow::actions::ComponentAction;
use crate::escrow::lifecycle::Panel;
use crate::escrow::types::{Currency, Role, Trade};
use crate::transport::OutboundMessage;

/// Response callback types.
pub mod callback {
    pub const PONG: u8 = 1;
    pub const CHANNEL_MESSAGE: u8 = 4;
    pub const DEFERRED_CHANNEL_MESSAGE: u8 = 5;
    pub const UPDATE_MESSAGE: u8 = 7;
    pub const MODAL: u8 = 9;
}

const EPHEMERAL: u64 = 1 << 6;
const MAX_BUTTONS_PER_ROW: usize = 5;
const MAX_ROWS: usize = 5;
/// Buttons one message can carry.
pub const MAX_ACTIONS: usize = MAX_BUTTONS_PER_ROW * MAX_ROWS;
/// Trades listed by `/status` before the rest are summarized.
pub const MAX_STATUS_LINES: usize = 15;

/// Text-input ids inside the trade form modal.
pub const FIELD_COUNTERPARTY: &str = "counterparty";
pub const FIELD_YOU_GIVE: &str = "you_give";
pub const FIELD_THEY_GIVE: &str = "they_give";
pub const FIELD_AMOUNT: &str = "amount";

pub fn pong() -> Value {
    json!({ "type": callback::PONG })
}

/// Private reply seen only by the acting user.
pub fn ephemeral(content: impl Into<String>) -> Value {
    json!({
        "type": callback::CHANNEL_MESSAGE,
        "data": { "content": content.into(), "flags": EPHEMERAL, "allowed_mentions": { "parse": [] } }
    })
}

pub fn ephemeral_with_actions(content: impl Into<String>, rows: Vec<Value>) -> Value {
    json!({
        "type": callback::CHANNEL_MESSAGE,
        "data": {
            "content": content.into(),
            "flags": EPHEMERAL,
            "components": rows,
            "allowed_mentions": { "parse": [] }
        }
    })
}

pub fn deferred_ephemeral() -> Value {
    json!({ "type": callback::DEFERRED_CHANNEL_MESSAGE, "data": { "flags": EPHEMERAL } })
}

/// Replace the controls on the message the pressed component belongs to.
pub fn update_components(actions: &[ComponentAction]) -> Value {
    json!({
        "type": callback::UPDATE_MESSAGE,
        "data": { "components": action_rows(actions) }
    })
}

pub fn panel(panel: &Panel) -> Value {
    let options: Vec<Value> = panel
        .currencies
        .iter()
        .map(|c| json!({ "label": c.label(), "value": c.code() }))
        .collect();
    json!({
        "type": callback::CHANNEL_MESSAGE,
        "data": {
            "embeds": [{ "title": "Middleman Service", "description": panel.description }],
            "components": [{
                "type": 1,
                "components": [{
                    "type": 3,
                    "custom_id": ComponentAction::SelectCurrency.to_string(),
                    "placeholder": ComponentAction::SelectCurrency.label(),
                    "min_values": 1,
                    "max_values": 1,
                    "options": options
                }]
            }]
        }
    })
}

pub fn trade_form(currency: Currency) -> Value {
    let input = |id: &str, label: &str, placeholder: &str| {
        json!({
            "type": 1,
            "components": [{
                "type": 4,
                "custom_id": id,
                "label": label,
                "placeholder": placeholder,
                "style": 1,
                "required": true,
                "max_length": crate::escrow::types::TradeForm::MAX_FIELD_LEN
            }]
        })
    };
    json!({
        "type": callback::MODAL,
        "data": {
            "custom_id": ComponentAction::TradeForm(currency).to_string(),
            "title": format!("{} - {}", ComponentAction::TradeForm(currency).label(), currency.label()),
            "components": [
                input(FIELD_COUNTERPARTY, "Other user (mention or ID)", "@user or 123456789012345678"),
                input(FIELD_YOU_GIVE, "You give", "e.g. 0.5 LTC"),
                input(FIELD_THEY_GIVE, "They give", "e.g. Steam gift card"),
                input(
                    FIELD_AMOUNT,
                    &format!("Escrow amount ({})", currency.code()),
                    "e.g. 0.5",
                ),
            ]
        }
    })
}

/// Body for `POST /channels/{id}/messages`.
pub fn channel_message(message: &OutboundMessage) -> Value {
    json!({
        "content": message.content,
        "components": action_rows(&message.actions),
        "allowed_mentions": { "parse": ["users"] }
    })
}

pub fn action_rows(actions: &[ComponentAction]) -> Vec<Value> {
    actions
        .chunks(MAX_BUTTONS_PER_ROW)
        .take(MAX_ROWS)
        .map(|chunk| json!({ "type": 1, "components": chunk.iter().map(button).collect::<Vec<_>>() }))
        .collect()
}

fn button(action: &ComponentAction) -> Value {
    let style = match action {
        ComponentAction::ChooseRole {
            role: Role::Sender, ..
        } => 1,
        ComponentAction::ChooseRole { .. } => 2,
        ComponentAction::Release { .. } => 3,
        ComponentAction::Cancel { .. } => 4,
        _ => 2,
    };
    let label = match action {
        ComponentAction::Cancel { trade } | ComponentAction::Release { trade } => {
            format!("{} #{}", action.label(), trade)
        }
        _ => action.label().to_string(),
    };
    json!({
        "type": 2,
        "style": style,
        "label": label,
        "custom_id": action.to_string()
    })
}

/// `/status` reply: a line per open trade and as many trades' controls as
/// fit on one message. Whatever is left out is counted in the text.
pub fn status(open: &[(Trade, Vec<ComponentAction>)]) -> Value {
    if open.is_empty() {
        return ephemeral("You have no open trades.");
    }
    let mut lines: Vec<String> = open
        .iter()
        .take(MAX_STATUS_LINES)
        .map(|(t, _)| status_line(t))
        .collect();
    if open.len() > MAX_STATUS_LINES {
        lines.push(format!("...and {} more open trades.", open.len() - MAX_STATUS_LINES));
    }

    let mut actions: Vec<ComponentAction> = Vec::new();
    let mut without_controls = 0;
    for (_, trade_actions) in open {
        if actions.len() + trade_actions.len() <= MAX_ACTIONS {
            actions.extend(trade_actions.iter().copied());
        } else if !trade_actions.is_empty() {
            without_controls += 1;
        }
    }
    if without_controls > 0 {
        lines.push(format!(
            "Buttons for {} more trade(s) did not fit; use the controls in each trade channel.",
            without_controls
        ));
    }
    ephemeral_with_actions(lines.join("\n"), action_rows(&actions))
}

/// One line per trade for `/status`.
pub fn status_line(trade: &Trade) -> String {
    let mut line = format!(
        "#{} {} with {} / {}: {}",
        trade.id,
        trade.currency.format_units(trade.expected_amount),
        trade.initiator_id.mention(),
        trade.counterparty_id.mention(),
        trade.status.label()
    );
    if let Some(channel) = &trade.channel_ref {
        line.push_str(&format!(" (<#{}>)", channel));
    }
    line
}
