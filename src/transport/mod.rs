//! Chat transport seam
//!
//! The controller needs four outbound primitives from the chat platform;
//! replies to the acting user travel back through the inbound
//! interaction response instead.

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::escrow::actions::ComponentAction;
use crate::escrow::types::{ChannelRef, UserId};

pub mod discord;

/// A channel message plus the interactive controls attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundMessage {
    pub content: String,
    pub actions: Vec<ComponentAction>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_actions(content: impl Into<String>, actions: Vec<ComponentAction>) -> Self {
        Self {
            content: content.into(),
            actions,
        }
    }
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// `Ok(None)` when the identity cannot be a trade party: unknown, outside
    /// the community, or a bot account.
    async fn resolve_user(&self, user: &UserId) -> Result<Option<UserId>, TransportError>;

    /// Create a channel only `members` (and the bot) can see.
    async fn create_private_channel(
        &self,
        name: &str,
        members: &[UserId],
    ) -> Result<ChannelRef, TransportError>;

    async fn send_to_channel(
        &self,
        channel: &ChannelRef,
        message: OutboundMessage,
    ) -> Result<(), TransportError>;

    /// Delete a trade channel. Already-deleted channels count as closed.
    async fn close_channel(&self, channel: &ChannelRef) -> Result<(), TransportError>;
}
