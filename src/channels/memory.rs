use super::traits::{
    Channel, GuildRole, InboundEvent, Interaction, InteractionReply, MessageRef, OutboundMessage,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// One outbound effect, in the order the bot produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Sent {
        channel_id: u64,
        message: OutboundMessage,
        sent: MessageRef,
    },
    Deleted(MessageRef),
    Responded {
        interaction_id: u64,
        reply: InteractionReply,
    },
    Followup {
        interaction_id: u64,
        reply: InteractionReply,
    },
}

/// In-process channel that records every outbound effect instead of talking
/// to a platform. Used to drive the bot in tests and dry runs.
pub struct MemoryChannel {
    effects: Mutex<Vec<Effect>>,
    roles: Mutex<HashMap<u64, Vec<GuildRole>>>,
    next_message_id: AtomicU64,
    guild_count: AtomicUsize,
    fail_replies: AtomicBool,
    fail_sends: AtomicBool,
    closed: CancellationToken,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            effects: Mutex::new(Vec::new()),
            roles: Mutex::new(HashMap::new()),
            next_message_id: AtomicU64::new(10_000),
            guild_count: AtomicUsize::new(1),
            fail_replies: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    pub fn set_roles(&self, guild_id: u64, roles: Vec<GuildRole>) {
        self.roles.lock().insert(guild_id, roles);
    }

    /// Make sends that reply to another message fail.
    pub fn fail_replies(&self, fail: bool) {
        self.fail_replies.store(fail, Ordering::SeqCst);
    }

    /// Make every send fail.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn effects(&self) -> Vec<Effect> {
        self.effects.lock().clone()
    }

    pub fn clear(&self) {
        self.effects.lock().clear();
    }

    pub fn sent(&self) -> Vec<(u64, OutboundMessage)> {
        self.effects
            .lock()
            .iter()
            .filter_map(|e| match e {
                Effect::Sent {
                    channel_id,
                    message,
                    ..
                } => Some((*channel_id, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.effects
            .lock()
            .iter()
            .filter_map(|e| match e {
                Effect::Deleted(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    /// Interaction responses and followups, in order.
    pub fn replies(&self) -> Vec<InteractionReply> {
        self.effects
            .lock()
            .iter()
            .filter_map(|e| match e {
                Effect::Responded { reply, .. } | Effect::Followup { reply, .. } => {
                    Some(reply.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Text of every sent message and interaction reply, in order.
    pub fn texts(&self) -> Vec<String> {
        self.effects
            .lock()
            .iter()
            .filter_map(|e| match e {
                Effect::Sent { message, .. } => message.content.clone(),
                Effect::Responded { reply, .. } | Effect::Followup { reply, .. } => {
                    reply.content.clone()
                }
                Effect::Deleted(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl Channel for MemoryChannel {
    fn name(&self) -> &str {
        "memory"
    }

    async fn listen(&self, _tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        self.closed.cancelled().await;
        Ok(())
    }

    async fn send_message(
        &self,
        channel_id: u64,
        message: &OutboundMessage,
    ) -> anyhow::Result<MessageRef> {
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("send rejected");
        }
        if message.reply_to.is_some() && self.fail_replies.load(Ordering::SeqCst) {
            anyhow::bail!("reply target no longer exists");
        }
        let sent = MessageRef {
            channel_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        };
        self.effects.lock().push(Effect::Sent {
            channel_id,
            message: message.clone(),
            sent,
        });
        Ok(sent)
    }

    async fn delete_message(&self, message: MessageRef) -> anyhow::Result<()> {
        self.effects.lock().push(Effect::Deleted(message));
        Ok(())
    }

    async fn respond_interaction(
        &self,
        interaction: &Interaction,
        reply: &InteractionReply,
    ) -> anyhow::Result<()> {
        self.effects.lock().push(Effect::Responded {
            interaction_id: interaction.id,
            reply: reply.clone(),
        });
        Ok(())
    }

    async fn followup(
        &self,
        interaction: &Interaction,
        reply: &InteractionReply,
    ) -> anyhow::Result<()> {
        self.effects.lock().push(Effect::Followup {
            interaction_id: interaction.id,
            reply: reply.clone(),
        });
        Ok(())
    }

    fn guild_roles(&self, guild_id: u64) -> Vec<GuildRole> {
        self.roles.lock().get(&guild_id).cloned().unwrap_or_default()
    }

    fn guild_count(&self) -> usize {
        self.guild_count.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.cancel();
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
