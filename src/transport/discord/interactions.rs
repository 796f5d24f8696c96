//! Inbound interactions endpoint
//!
//! Discord POSTs every command, component press and modal submission here,
//! signed with the application's Ed25519 key. Requests that fail verification,
//! or whose signed timestamp is too far from the local clock, are rejected
//! with 401 before the body is looked at.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::errors::EscrowError;
use crate::escrow::actions::{legal_actions, ComponentAction};
use crate::escrow::lifecycle::{CancelReason, RoleOutcome};
use crate::escrow::types::{Currency, TradeForm, UserId};
use crate::transport::discord::commands::{self, Command};
use crate::transport::discord::render;
use crate::transport::discord::rest::DiscordRest;
use crate::util::LogThrottle;

const MAX_BODY_BYTES: usize = 64 * 1024;
/// Accepted distance between the signed timestamp and the local clock.
pub const MAX_SIGNATURE_SKEW_SECS: i64 = 300;
/// Message component type of a button.
const BUTTON: u64 = 2;

/// Interaction types.
mod kind {
    pub const PING: u8 = 1;
    pub const APPLICATION_COMMAND: u8 = 2;
    pub const MESSAGE_COMPONENT: u8 = 3;
    pub const MODAL_SUBMIT: u8 = 5;
}

#[derive(Clone)]
pub struct InteractionState {
    pub ctx: AppContext,
    pub verifier: VerifyingKey,
    /// Used for follow-up edits of deferred responses.
    pub rest: DiscordRest,
    /// Last button press per user.
    presses: Arc<LogThrottle>,
    cooldown: Duration,
}

impl InteractionState {
    pub fn new(ctx: AppContext, public_key_hex: &str, rest: DiscordRest) -> anyhow::Result<Self> {
        let cooldown = Duration::from_millis(ctx.config.button_cooldown_ms);
        Ok(Self {
            verifier: parse_public_key(public_key_hex)?,
            ctx,
            rest,
            presses: Arc::new(LogThrottle::new()),
            cooldown,
        })
    }

    /// Per-user button cooldown; `false` means the press is dropped.
    fn admit_press(&self, actor: &UserId) -> bool {
        self.presses.prune(self.cooldown);
        self.presses.allow(actor.as_str(), self.cooldown)
    }
}

pub fn parse_public_key(public_key_hex: &str) -> anyhow::Result<VerifyingKey> {
    let raw = hex::decode(public_key_hex.trim())?;
    let bytes: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("public key must be 32 bytes, got {}", raw.len()))?;
    Ok(VerifyingKey::from_bytes(&bytes)?)
}

pub fn router(state: InteractionState) -> Router {
    Router::new()
        .route("/interactions", post(handle_interaction))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(st): State<InteractionState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "wallet": st.ctx.controller.issuer().is_available(),
    }))
}

#[derive(Debug, Deserialize)]
struct Interaction {
    #[serde(rename = "type")]
    kind: u8,
    token: Option<String>,
    #[serde(default)]
    data: Value,
    member: Option<Member>,
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Member {
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
}

impl Interaction {
    fn actor(&self) -> Option<UserId> {
        self.member
            .as_ref()
            .map(|m| &m.user)
            .or(self.user.as_ref())
            .map(|u| UserId::new(u.id.clone()))
    }
}

/// Check `X-Signature-Ed25519` over `X-Signature-Timestamp || body`, and that
/// the timestamp lies within `MAX_SIGNATURE_SKEW_SECS` of `now` (unix seconds).
pub fn verify_signature(key: &VerifyingKey, headers: &HeaderMap, body: &[u8], now: i64) -> bool {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(sig_hex), Some(timestamp)) =
        (header("x-signature-ed25519"), header("x-signature-timestamp"))
    else {
        return false;
    };
    let Ok(signed_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if now.abs_diff(signed_at) > MAX_SIGNATURE_SKEW_SECS as u64 {
        debug!(signed_at, now, "[INTERACTIONS] stale signature timestamp");
        return false;
    }
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body);
    key.verify(&message, &signature).is_ok()
}

async fn handle_interaction(
    State(st): State<InteractionState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !verify_signature(&st.verifier, &headers, &body, Utc::now().timestamp()) {
        return (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();
    }
    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(i) => i,
        Err(e) => {
            warn!("[INTERACTIONS] undecodable payload: {}", e);
            return (StatusCode::BAD_REQUEST, "bad interaction payload").into_response();
        }
    };
    if interaction.kind == kind::PING {
        return Json(render::pong()).into_response();
    }
    let Some(actor) = interaction.actor() else {
        return (StatusCode::BAD_REQUEST, "interaction without a user").into_response();
    };

    let reply = match interaction.kind {
        kind::APPLICATION_COMMAND => on_command(&st, &actor, &interaction.data).await,
        kind::MESSAGE_COMPONENT => on_component(&st, &actor, &interaction.data).await,
        kind::MODAL_SUBMIT => on_modal_submit(&st, actor, &interaction).await,
        other => {
            debug!("[INTERACTIONS] ignoring interaction type {}", other);
            return (StatusCode::BAD_REQUEST, "unsupported interaction type").into_response();
        }
    };
    Json(reply).into_response()
}

fn log_rejection(err: &EscrowError) {
    match err {
        EscrowError::Transport(_) | EscrowError::Storage(_) | EscrowError::Corrupt(_) => {
            warn!("[INTERACTIONS] {}", err)
        }
        _ => debug!("[INTERACTIONS] rejected: {}", err),
    }
}

fn notice(err: &EscrowError) -> Value {
    log_rejection(err);
    render::ephemeral(err.user_notice())
}

async fn on_command(st: &InteractionState, actor: &UserId, data: &Value) -> Value {
    let controller = &st.ctx.controller;
    let command = match commands::parse(data) {
        Ok(c) => c,
        Err(e) => return notice(&e),
    };
    let result = match command {
        Command::Panel => controller.open_panel(actor).map(|p| render::panel(&p)),
        Command::GenerateKey => controller
            .generate_key(actor)
            .map(|key| render::ephemeral(format!("New activation key: `{}`", key))),
        Command::RedeemKey { key } => controller
            .redeem_key(actor, &key)
            .map(|_| render::ephemeral("Activated! You can now open trades from the panel.")),
        Command::Status => controller.status_for(actor).map(|open| render::status(&open)),
        Command::Release { trade, address } => controller
            .release(trade, actor, address)
            .await
            .map(|t| render::ephemeral(format!("Trade #{} released.", t.id))),
        Command::Cancel { trade } => controller
            .cancel(trade, CancelReason::Requested(actor.clone()))
            .await
            .map(|t| render::ephemeral(format!("Trade #{} cancelled.", t.id))),
        Command::ConfirmDeposit { trade, amount } => controller
            .confirm_deposit_manually(actor, trade, amount)
            .await
            .map(|t| render::ephemeral(format!("Trade #{} marked as funded.", t.id))),
        Command::Close { trade } => controller
            .close_channel(actor, trade)
            .await
            .map(|t| render::ephemeral(format!("Closed the channel of trade #{}.", t.id))),
    };
    result.unwrap_or_else(|e| notice(&e))
}

async fn on_component(st: &InteractionState, actor: &UserId, data: &Value) -> Value {
    let controller = &st.ctx.controller;
    let custom_id = data.get("custom_id").and_then(Value::as_str).unwrap_or_default();
    let action: ComponentAction = match custom_id.parse() {
        Ok(a) => a,
        Err(e) => {
            debug!("[INTERACTIONS] {}", e);
            return render::ephemeral("This control is no longer valid.");
        }
    };
    let is_button = data.get("component_type").and_then(Value::as_u64) == Some(BUTTON);
    if is_button && !st.admit_press(actor) {
        return render::ephemeral("Please wait a few seconds before clicking again.");
    }

    let result = match action {
        ComponentAction::SelectCurrency => {
            let picked = data
                .get("values")
                .and_then(Value::as_array)
                .and_then(|v| v.first())
                .and_then(Value::as_str)
                .unwrap_or_default();
            match picked.parse::<Currency>() {
                Ok(currency) => controller
                    .begin_trade(actor, currency)
                    .map(|_| render::trade_form(currency)),
                Err(e) => Err(e),
            }
        }
        ComponentAction::ChooseRole { trade, role } => {
            match controller.choose_role(trade, actor, role).await {
                Ok(RoleOutcome::Chosen(t)) => Ok(render::update_components(&legal_actions(&t))),
                Ok(RoleOutcome::AlreadyChosen(_)) => Ok(render::ephemeral(format!(
                    "You already chose {}.",
                    role.as_str()
                ))),
                Err(e) => Err(e),
            }
        }
        ComponentAction::Release { trade } => controller
            .release(trade, actor, None)
            .await
            .map(|_| render::update_components(&[])),
        ComponentAction::Cancel { trade } => controller
            .cancel(trade, CancelReason::Requested(actor.clone()))
            .await
            .map(|_| render::update_components(&[])),
        ComponentAction::TradeForm(_) => Ok(render::ephemeral("This control is no longer valid.")),
    };
    result.unwrap_or_else(|e| notice(&e))
}

/// Modal values keyed by text-input id.
fn modal_field(data: &Value, id: &str) -> String {
    data.get("components")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|row| row.get("components").and_then(Value::as_array))
        .flatten()
        .find(|c| c.get("custom_id").and_then(Value::as_str) == Some(id))
        .and_then(|c| c.get("value"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

async fn on_modal_submit(st: &InteractionState, actor: UserId, interaction: &Interaction) -> Value {
    let data = &interaction.data;
    let custom_id = data.get("custom_id").and_then(Value::as_str).unwrap_or_default();
    let currency = match custom_id.parse::<ComponentAction>() {
        Ok(ComponentAction::TradeForm(c)) => c,
        _ => return render::ephemeral("This form is no longer valid."),
    };
    let Some(token) = interaction.token.clone() else {
        return render::ephemeral("This form is no longer valid.");
    };
    let form = TradeForm {
        counterparty: modal_field(data, render::FIELD_COUNTERPARTY),
        you_give: modal_field(data, render::FIELD_YOU_GIVE),
        they_give: modal_field(data, render::FIELD_THEY_GIVE),
        amount: modal_field(data, render::FIELD_AMOUNT),
    };

    // identity lookup and channel creation can outlast the response window
    let controller = st.ctx.controller.clone();
    let rest = st.rest.clone();
    tokio::spawn(async move {
        let content = match controller.initiate(&actor, currency, form).await {
            Ok(trade) => {
                info!(trade_id = trade.id, "[INTERACTIONS] trade opened");
                match &trade.channel_ref {
                    Some(ch) => format!("Trade #{} created: <#{}>", trade.id, ch),
                    None => format!("Trade #{} created.", trade.id),
                }
            }
            Err(e) => {
                log_rejection(&e);
                e.user_notice()
            }
        };
        if let Err(e) = rest.edit_original(&token, json!({ "content": content })).await {
            warn!("[INTERACTIONS] follow-up edit failed: {}", e);
        }
    });
    render::deferred_ephemeral()
}
