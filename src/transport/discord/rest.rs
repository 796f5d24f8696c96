// Discord REST client (bot token auth)

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::TransportError;
use crate::escrow::types::{ChannelRef, UserId};
use crate::transport::discord::render;
use crate::transport::{ChatTransport, OutboundMessage};

/// VIEW_CHANNEL
const PERM_VIEW: u64 = 1 << 10;
/// VIEW_CHANNEL | SEND_MESSAGES | READ_MESSAGE_HISTORY
const PERM_MEMBER: u64 = (1 << 10) | (1 << 11) | (1 << 16);

#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub api_base: String,
    pub token: String,
    pub application_id: String,
    pub guild_id: String,
    /// Parent category for trade channels.
    pub ticket_category: Option<String>,
}

#[derive(Clone)]
pub struct DiscordRest {
    client: reqwest::Client,
    settings: DiscordSettings,
}

#[derive(Deserialize)]
struct Snowflake {
    id: String,
}

#[derive(Deserialize)]
struct GuildMember {
    user: MemberUser,
}

#[derive(Deserialize)]
struct MemberUser {
    id: String,
    #[serde(default)]
    bot: bool,
}

impl DiscordRest {
    pub fn new(mut settings: DiscordSettings) -> Self {
        settings.api_base = settings.api_base.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent("DiscordBot (escrow-bot, 0.1)")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, settings }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.api_base, path)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Bot {}", self.settings.token))
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        })
    }

    /// Replace the deferred response of an interaction.
    pub async fn edit_original(&self, interaction_token: &str, body: Value) -> Result<(), TransportError> {
        let url = self.url(&format!(
            "/webhooks/{}/{}/messages/@original",
            self.settings.application_id, interaction_token
        ));
        let resp = self.client.patch(url).json(&body).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    /// Overwrite the guild's slash commands with `commands`.
    pub async fn register_commands(&self, commands: &Value) -> Result<usize, TransportError> {
        let url = self.url(&format!(
            "/applications/{}/guilds/{}/commands",
            self.settings.application_id, self.settings.guild_id
        ));
        let resp = self.auth(self.client.put(url)).json(commands).send().await?;
        let resp = Self::check(resp).await?;
        let registered: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        info!("[DISCORD] Registered {} guild commands", registered.len());
        Ok(registered.len())
    }

    fn channel_body(&self, name: &str, members: &[UserId]) -> Value {
        let mut overwrites = vec![json!({
            // @everyone shares the guild id
            "id": self.settings.guild_id,
            "type": 0,
            "deny": PERM_VIEW.to_string(),
        })];
        let bot = UserId::new(self.settings.application_id.clone());
        for member in members.iter().chain(std::iter::once(&bot)) {
            overwrites.push(json!({
                "id": member.as_str(),
                "type": 1,
                "allow": PERM_MEMBER.to_string(),
            }));
        }
        let mut body = json!({
            "name": name,
            "type": 0,
            "permission_overwrites": overwrites,
        });
        if let Some(parent) = &self.settings.ticket_category {
            body["parent_id"] = json!(parent);
        }
        body
    }
}

#[async_trait]
impl ChatTransport for DiscordRest {
    async fn resolve_user(&self, user: &UserId) -> Result<Option<UserId>, TransportError> {
        if user.as_str() == self.settings.application_id {
            return Ok(None);
        }
        let url = self.url(&format!(
            "/guilds/{}/members/{}",
            self.settings.guild_id, user
        ));
        let resp = self.auth(self.client.get(url)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(user = %user, "[DISCORD] not a guild member");
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        let member: GuildMember = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        if member.user.bot || member.user.id == self.settings.application_id {
            debug!(user = %user, "[DISCORD] bot accounts cannot trade");
            return Ok(None);
        }
        Ok(Some(UserId(member.user.id)))
    }

    async fn create_private_channel(
        &self,
        name: &str,
        members: &[UserId],
    ) -> Result<ChannelRef, TransportError> {
        let url = self.url(&format!("/guilds/{}/channels", self.settings.guild_id));
        let resp = self
            .auth(self.client.post(url))
            .json(&self.channel_body(name, members))
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let created: Snowflake = resp
            .json()
            .await
            .map_err(|e| TransportError::Decode(e.to_string()))?;
        info!(channel = %created.id, "[DISCORD] Created channel {}", name);
        Ok(created.id)
    }

    async fn send_to_channel(
        &self,
        channel: &ChannelRef,
        message: OutboundMessage,
    ) -> Result<(), TransportError> {
        let url = self.url(&format!("/channels/{}/messages", channel));
        let body = render::channel_message(&message);
        let resp = self.auth(self.client.post(url)).json(&body).send().await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn close_channel(&self, channel: &ChannelRef) -> Result<(), TransportError> {
        let url = self.url(&format!("/channels/{}", channel));
        let resp = self.auth(self.client.delete(url)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!(channel = %channel, "[DISCORD] channel already gone");
            return Ok(());
        }
        Self::check(resp).await?;
        info!(channel = %channel, "[DISCORD] Deleted channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rest() -> DiscordRest {
        DiscordRest::new(DiscordSettings {
            api_base: "http://localhost/api/".into(),
            token: "t".into(),
            application_id: "900".into(),
            guild_id: "800".into(),
            ticket_category: Some("700".into()),
        })
    }

    #[test]
    fn channel_is_hidden_from_everyone_else() {
        let body = rest().channel_body("trade-1", &[UserId::new("1"), UserId::new("2")]);
        let ow = body["permission_overwrites"].as_array().unwrap();
        assert_eq!(ow.len(), 4);
        assert_eq!(ow[0]["id"], "800");
        assert_eq!(ow[0]["deny"], "1024");
        let allowed: Vec<&str> = ow[1..].iter().map(|o| o["id"].as_str().unwrap()).collect();
        assert_eq!(allowed, vec!["1", "2", "900"]);
        assert_eq!(ow[1]["allow"], "68608");
        assert_eq!(body["parent_id"], "700");
    }

    #[test]
    fn base_url_is_normalized() {
        assert_eq!(rest().url("/users/1"), "http://localhost/api/users/1");
    }
}
