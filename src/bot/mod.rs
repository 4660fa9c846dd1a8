//! Inbound event dispatch.
//!
//! The daemon feeds events here one at a time, in arrival order. Each event
//! is handled behind a boundary that turns errors and panics into a log line
//! so one bad event never stops the loop.

use crate::alerts::{dispatch_alert, is_alert_trigger};
use crate::channels::{
    deliver, Channel, GuildRef, InboundEvent, InboundMessage, MemberRef, OutboundMessage,
};
use crate::commands::{self, NOTICE_TTL, PREFIX};
use crate::config::{render_template, ConfigStore};
use crate::lifecycle::Lifecycle;
use crate::observability::{AuditKind, AuditLog};
use crate::security::{CooldownTracker, PermissionEvaluator};
use crate::session::{self, WelcomeMenus};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

pub const DISPATCH_COMPONENT: &str = "dispatcher";

const GENERIC_FAILURE_NOTICE: &str = "❌ Something went wrong. The error has been logged.";

/// Everything a handler may touch. Shared by `Arc` between the event loop and
/// the tasks it spawns.
pub struct BotContext {
    pub channel: Arc<dyn Channel>,
    pub store: Arc<ConfigStore>,
    pub evaluator: PermissionEvaluator,
    pub cooldowns: CooldownTracker,
    pub lifecycle: Lifecycle,
    pub audit: AuditLog,
    pub menus: WelcomeMenus,
}

impl BotContext {
    pub fn new(
        channel: Arc<dyn Channel>,
        store: Arc<ConfigStore>,
        owner_id: u64,
        log_channel_id: Option<u64>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            audit: AuditLog::new(Arc::clone(&channel), log_channel_id),
            channel,
            store,
            evaluator: PermissionEvaluator::new(owner_id),
            cooldowns: CooldownTracker::new(),
            lifecycle,
            menus: WelcomeMenus::new(),
        }
    }
}

/// Handle one inbound event. Never fails and never panics outward.
pub async fn handle_event(ctx: &Arc<BotContext>, event: InboundEvent) {
    let notice_channel = match &event {
        InboundEvent::MessageReceived(msg) if !msg.author.is_bot => Some(msg.channel_id),
        InboundEvent::ButtonClicked(interaction) => Some(interaction.channel_id),
        _ => None,
    };

    let outcome = AssertUnwindSafe(dispatch(ctx, event)).catch_unwind().await;
    let failure = match outcome {
        Ok(Ok(())) => {
            crate::health::mark_component_ok(DISPATCH_COMPONENT);
            return;
        }
        Ok(Err(e)) => format!("{e:#}"),
        Err(panic) => panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".into()),
    };

    tracing::error!("Event handler failed: {failure}");
    crate::health::mark_component_error(DISPATCH_COMPONENT, &failure);
    if let Some(channel_id) = notice_channel {
        let notice = OutboundMessage::text(GENERIC_FAILURE_NOTICE).delete_after(NOTICE_TTL);
        if let Err(e) = deliver(&ctx.channel, channel_id, notice).await {
            tracing::warn!("Failure notice not delivered: {e}");
        }
    }
}

async fn dispatch(ctx: &Arc<BotContext>, event: InboundEvent) -> anyhow::Result<()> {
    match event {
        InboundEvent::MessageReceived(msg) => on_message(ctx, msg).await,
        InboundEvent::ButtonClicked(interaction) => {
            let outcome = session::handle_click(ctx, interaction).await;
            tracing::debug!(?outcome, "Menu click handled");
        }
        InboundEvent::MemberJoined { member, guild } => {
            greet(ctx, &member, &guild, Greeting::Welcome).await;
        }
        InboundEvent::MemberLeft { member, guild } => {
            greet(ctx, &member, &guild, Greeting::Goodbye).await;
        }
        InboundEvent::Ready { user_name } => {
            tracing::info!("Bot online as {user_name}");
            ctx.audit
                .record(AuditKind::Info, format!("✅ Bot is online as {user_name}"))
                .await;
        }
    }
    Ok(())
}

async fn on_message(ctx: &Arc<BotContext>, msg: InboundMessage) {
    if msg.author.is_bot {
        return;
    }
    // A pending menu input consumes the message before anything else sees it.
    let Some(msg) = ctx.menus.offer_message(msg) else {
        return;
    };

    if msg.content.starts_with(PREFIX) {
        if let Err(e) = ctx.channel.delete_message(msg.message_ref()).await {
            tracing::debug!("Could not delete prefixed message {}: {e}", msg.id);
        }
    }

    if is_alert_trigger(&msg.content) {
        let allowed_roles = ctx.store.operational().allowed_roles;
        let outcome = dispatch_alert(&ctx.channel, &ctx.evaluator, &allowed_roles, &msg).await;
        tracing::debug!(?outcome, "CODE alert handled");
    }

    commands::route(ctx, &msg).await;
}

#[derive(Debug, Clone, Copy)]
enum Greeting {
    Welcome,
    Goodbye,
}

async fn greet(ctx: &BotContext, member: &MemberRef, guild: &GuildRef, greeting: Greeting) {
    let cfg = ctx.store.welcome();
    let (enabled, template) = match greeting {
        Greeting::Welcome => (cfg.welcome_enabled, &cfg.welcome_message),
        Greeting::Goodbye => (cfg.goodbye_enabled, &cfg.goodbye_message),
    };
    let Some(channel_id) = cfg.welcome_channel_id.filter(|_| enabled) else {
        return;
    };

    let text = render_template(template, &member.mention(), &guild.name);
    if let Err(e) = ctx
        .channel
        .send_message(channel_id, &OutboundMessage::text(text))
        .await
    {
        tracing::warn!("{greeting:?} for {} not delivered: {e}", member.id);
    }
}
