//! Discord adapter: REST client for outbound calls and the signed
//! interactions endpoint for inbound events.

pub mod commands;
pub mod interactions;
pub mod render;
pub mod rest;

pub use interactions::{router, InteractionState};
pub use rest::{DiscordRest, DiscordSettings};
