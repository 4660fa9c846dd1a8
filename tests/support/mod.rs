//! Shared fixtures: a bot wired to the recording in-memory channel.

#![allow(dead_code)]

use codewarden::bot::{handle_event, BotContext};
use codewarden::channels::{
    Actor, GuildRef, GuildRole, InboundEvent, InboundMessage, Interaction, MemoryChannel,
};
use codewarden::config::ConfigStore;
use codewarden::lifecycle::{Lifecycle, RestartRequest};
use codewarden::security::PermissionSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const OWNER: u64 = 1;
pub const CHANNEL: u64 = 20;
pub const GUILD: u64 = 30;
pub const LOG_CHANNEL: u64 = 400;

static NEXT_ID: AtomicU64 = AtomicU64::new(1_000);

pub struct Harness {
    pub ctx: Arc<BotContext>,
    pub mem: Arc<MemoryChannel>,
    pub restarts: mpsc::UnboundedReceiver<RestartRequest>,
    pub lifecycle: Lifecycle,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_audit() -> Self {
        Self::build(Some(LOG_CHANNEL))
    }

    fn build(log_channel: Option<u64>) -> Self {
        let dir = TempDir::new().unwrap();
        let mem = Arc::new(MemoryChannel::new());
        mem.set_roles(
            GUILD,
            vec![
                GuildRole {
                    id: 70,
                    name: "Staff".into(),
                },
                GuildRole {
                    id: 71,
                    name: "Helpers".into(),
                },
                GuildRole {
                    id: 72,
                    name: "Night Shift".into(),
                },
            ],
        );
        let store = Arc::new(ConfigStore::open(dir.path()).unwrap());
        let (lifecycle, restarts) = Lifecycle::new();
        let ctx = Arc::new(BotContext::new(
            mem.clone(),
            store,
            OWNER,
            log_channel,
            lifecycle.clone(),
        ));
        Self {
            ctx,
            mem,
            restarts,
            lifecycle,
            dir,
        }
    }

    pub async fn send(&self, event: InboundEvent) {
        handle_event(&self.ctx, event).await;
    }

    pub async fn say(&self, author: Actor, content: &str) -> InboundMessage {
        let msg = message(author, content);
        self.send(InboundEvent::MessageReceived(msg.clone())).await;
        msg
    }

    pub async fn click(&self, actor: Actor, custom_id: &str) {
        self.send(InboundEvent::ButtonClicked(interaction(actor, custom_id)))
            .await;
    }

    /// Texts posted to the command channel.
    pub fn channel_texts(&self) -> Vec<String> {
        self.mem
            .sent()
            .into_iter()
            .filter(|(channel, _)| *channel == CHANNEL)
            .filter_map(|(_, msg)| msg.content)
            .collect()
    }

    pub fn last_reply(&self) -> Option<String> {
        self.mem.replies().last().and_then(|r| r.content.clone())
    }
}

pub fn actor(id: u64, roles: &[&str], permissions: PermissionSet) -> Actor {
    Actor {
        id,
        name: format!("member{id}"),
        is_bot: false,
        role_names: roles.iter().map(|r| (*r).to_string()).collect(),
        permissions,
    }
}

pub fn owner() -> Actor {
    actor(OWNER, &[], PermissionSet::default())
}

pub fn staff() -> Actor {
    actor(2, &["Staff"], PermissionSet::default())
}

pub fn regular() -> Actor {
    actor(3, &["Member"], PermissionSet::default())
}

pub fn guild() -> GuildRef {
    GuildRef {
        id: GUILD,
        name: "Night Market".into(),
    }
}

pub fn message(author: Actor, content: &str) -> InboundMessage {
    InboundMessage {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        author,
        channel_id: CHANNEL,
        guild: Some(guild()),
        content: content.into(),
        reply_to: None,
        role_mentions: vec![],
    }
}

pub fn interaction(actor: Actor, custom_id: &str) -> Interaction {
    Interaction {
        id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        application_id: 5,
        token: "tok".into(),
        actor,
        channel_id: CHANNEL,
        guild: Some(guild()),
        custom_id: custom_id.into(),
    }
}
