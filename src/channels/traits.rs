use crate::security::{PermissionSet, Principal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Guild (server) an event happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRef {
    pub id: u64,
    pub name: String,
}

/// The member behind an inbound event, with everything authorization needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: u64,
    pub name: String,
    pub is_bot: bool,
    pub role_names: Vec<String>,
    pub permissions: PermissionSet,
}

impl Actor {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }

    pub fn principal(&self) -> Principal<'_> {
        Principal {
            id: self.id,
            permissions: self.permissions,
            role_names: &self.role_names,
        }
    }
}

/// A message posted in a channel the bot can see.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: u64,
    pub author: Actor,
    pub channel_id: u64,
    pub guild: Option<GuildRef>,
    pub content: String,
    /// Message this one replies to, if any.
    pub reply_to: Option<u64>,
    /// Role ids mentioned in the content, in mention order.
    pub role_mentions: Vec<u64>,
}

impl InboundMessage {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            channel_id: self.channel_id,
            message_id: self.id,
        }
    }
}

/// A member joining or leaving a guild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    pub id: u64,
    pub name: String,
}

impl MemberRef {
    pub fn mention(&self) -> String {
        format!("<@{}>", self.id)
    }
}

/// A button click on a message the bot posted.
#[derive(Debug, Clone)]
pub struct Interaction {
    pub id: u64,
    pub application_id: u64,
    pub token: String,
    pub actor: Actor,
    pub channel_id: u64,
    pub guild: Option<GuildRef>,
    pub custom_id: String,
}

/// Everything the transport delivers to the bot.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    MessageReceived(InboundMessage),
    MemberJoined { member: MemberRef, guild: GuildRef },
    MemberLeft { member: MemberRef, guild: GuildRef },
    ButtonClicked(Interaction),
    Ready { user_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Platform-neutral rich message (a Discord embed).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichCard {
    pub title: String,
    pub description: Option<String>,
    pub color: u32,
    pub fields: Vec<CardField>,
    pub footer: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RichCard {
    pub fn new(title: impl Into<String>, color: u32) -> Self {
        Self {
            title: title.into(),
            color,
            ..Self::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(CardField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp = Some(at);
        self
    }

    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

/// Where a posted message lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// A channel post: text, card, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: Option<String>,
    pub card: Option<RichCard>,
    pub reply_to: Option<u64>,
    pub buttons: Vec<Button>,
    /// Remove the post again after this long.
    pub delete_after: Option<Duration>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn card(card: RichCard) -> Self {
        Self {
            card: Some(card),
            ..Self::default()
        }
    }

    pub fn reply_to(mut self, message_id: u64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn buttons(mut self, buttons: Vec<Button>) -> Self {
        self.buttons = buttons;
        self
    }

    pub fn delete_after(mut self, after: Duration) -> Self {
        self.delete_after = Some(after);
        self
    }
}

/// Response to an interaction, visible only to the clicking user when
/// `ephemeral` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionReply {
    pub content: Option<String>,
    pub card: Option<RichCard>,
    pub ephemeral: bool,
}

impl InteractionReply {
    pub fn ephemeral_text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            card: None,
            ephemeral: true,
        }
    }

    pub fn ephemeral_card(card: RichCard) -> Self {
        Self {
            content: None,
            card: Some(card),
            ephemeral: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildRole {
    pub id: u64,
    pub name: String,
}

/// Core channel trait: the event bus the bot is attached to.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Start listening for inbound events (long-running). Returns `Ok` when
    /// the connection ends or [`Channel::close`] was called.
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()>;

    /// Post a message; `delete_after` is honored by the caller, not here.
    async fn send_message(
        &self,
        channel_id: u64,
        message: &OutboundMessage,
    ) -> anyhow::Result<MessageRef>;

    /// Delete a message. Already-deleted messages count as success.
    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()>;

    /// First response to a button click.
    async fn respond_interaction(
        &self,
        interaction: &Interaction,
        reply: &InteractionReply,
    ) -> anyhow::Result<()>;

    /// Additional response after the first one.
    async fn followup(
        &self,
        interaction: &Interaction,
        reply: &InteractionReply,
    ) -> anyhow::Result<()>;

    /// Roles of a guild, from the transport's cache.
    fn guild_roles(&self, guild_id: u64) -> Vec<GuildRole>;

    /// Number of guilds the bot is in.
    fn guild_count(&self) -> usize;

    /// Disconnect from the event stream. `listen` returns afterwards and the
    /// channel is not reconnected.
    async fn close(&self);

    fn is_closed(&self) -> bool;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_builder_collects_fields() {
        let card = RichCard::new("🔴 CODE RED", 0xe7_4c_3c)
            .description("PALDO")
            .field("📝 Note", "urgent", false);
        assert_eq!(card.field_value("📝 Note"), Some("urgent"));
        assert_eq!(card.description.as_deref(), Some("PALDO"));
    }

    #[test]
    fn mentions_use_snowflake() {
        let member = MemberRef {
            id: 42,
            name: "kai".into(),
        };
        assert_eq!(member.mention(), "<@42>");
    }
}
