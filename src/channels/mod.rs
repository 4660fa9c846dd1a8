//! Channel subsystem: the event bus the bot is attached to.
//!
//! [`Channel`] is the boundary between the bot and the messaging platform. It
//! delivers [`InboundEvent`]s and exposes the outbound effects the bot needs
//! (post, delete, interaction replies). [`DiscordChannel`] is the production
//! implementation; tests drive the bot through an in-memory one.

pub mod discord;
pub mod memory;
pub mod traits;

pub use discord::DiscordChannel;
pub use memory::{Effect, MemoryChannel};
pub use traits::{
    Actor, Button, ButtonStyle, CardField, Channel, GuildRef, GuildRole, InboundEvent,
    InboundMessage, Interaction, InteractionReply, MemberRef, MessageRef, OutboundMessage,
    RichCard,
};

use crate::config::Config;
use std::sync::Arc;

/// Build the configured transport. Fails when no bot token is available.
pub fn build_channel(config: &Config) -> anyhow::Result<Arc<DiscordChannel>> {
    let token = config.require_token()?;
    Ok(Arc::new(DiscordChannel::new(token.to_string(), config.guild_id)))
}

/// Post `message` and, when it carries `delete_after`, remove it again once
/// that much time has passed. The removal runs detached.
pub async fn deliver(
    channel: &Arc<dyn Channel>,
    channel_id: u64,
    message: OutboundMessage,
) -> anyhow::Result<MessageRef> {
    let sent = channel.send_message(channel_id, &message).await?;
    if let Some(after) = message.delete_after {
        schedule_delete(Arc::clone(channel), sent, after);
    }
    Ok(sent)
}

/// Delete `message` after `after`, ignoring failures.
pub fn schedule_delete(channel: Arc<dyn Channel>, message: MessageRef, after: std::time::Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        if let Err(e) = channel.delete_message(message).await {
            tracing::debug!("Auto-delete of message {} failed: {e}", message.message_id);
        }
    });
}
