//! Interactive welcome/goodbye menu.
//!
//! `!welcomemenu` posts a card with buttons. Each menu belongs to the member
//! who opened it and stops accepting clicks after [`MENU_TTL`]. The two
//! "set text" buttons prompt privately and then capture that member's next
//! message in the same channel, for at most [`INPUT_TIMEOUT`].

pub mod waiters;

pub use waiters::{AlreadyWaiting, TextWaiters, WaitKey, Waiter};

use crate::bot::BotContext;
use crate::channels::{
    deliver, Button, ButtonStyle, InboundMessage, Interaction, InteractionReply, OutboundMessage,
    RichCard,
};
use crate::config::{render_template, WelcomeConfig};
use crate::observability::AuditKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

pub const MENU_TTL: Duration = Duration::from_secs(300);
pub const INPUT_TIMEOUT: Duration = Duration::from_secs(60);

const CUSTOM_ID_PREFIX: &str = "wm";

pub const NOT_OPENER_NOTICE: &str = "❌ Only the command author can use this menu.";
pub const EXPIRED_NOTICE: &str = "⌛ This menu has expired. Run !welcomemenu again.";
pub const BUSY_NOTICE: &str =
    "⏳ Still waiting for your previous message. Type it in chat or wait for the timeout.";
pub const TIMEOUT_NOTICE: &str = "⏳ Timeout. Please try again.";
pub const SAVE_FAILED_NOTICE: &str = "❌ Could not save the change. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MenuTrigger {
    SetWelcomeText,
    SetGoodbyeText,
    SetChannel,
    Preview,
    Toggle,
    Reset,
}

impl MenuTrigger {
    pub const ALL: [Self; 6] = [
        Self::SetWelcomeText,
        Self::SetGoodbyeText,
        Self::SetChannel,
        Self::Preview,
        Self::Toggle,
        Self::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SetWelcomeText => "set_welcome",
            Self::SetGoodbyeText => "set_goodbye",
            Self::SetChannel => "set_channel",
            Self::Preview => "preview",
            Self::Toggle => "toggle",
            Self::Reset => "reset",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SetWelcomeText => "Set Welcome Message",
            Self::SetGoodbyeText => "Set Goodbye Message",
            Self::SetChannel => "Set Welcome Channel (current)",
            Self::Preview => "Preview Messages",
            Self::Toggle => "Toggle Welcome/Goodbye",
            Self::Reset => "Reset to Default",
        }
    }

    fn style(self) -> ButtonStyle {
        match self {
            Self::SetWelcomeText => ButtonStyle::Primary,
            Self::SetGoodbyeText | Self::Reset => ButtonStyle::Danger,
            Self::SetChannel | Self::Toggle => ButtonStyle::Secondary,
            Self::Preview => ButtonStyle::Success,
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    fn template_field(self) -> Option<TemplateField> {
        match self {
            Self::SetWelcomeText => Some(TemplateField::Welcome),
            Self::SetGoodbyeText => Some(TemplateField::Goodbye),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateField {
    Welcome,
    Goodbye,
}

impl TemplateField {
    fn noun(self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::Goodbye => "goodbye",
        }
    }

    fn prompt(self) -> String {
        format!(
            "✍️ Type the new {} message in chat (use {{user}} and {{guild}}):",
            self.noun()
        )
    }

    fn updated_notice(self) -> &'static str {
        match self {
            Self::Welcome => "✅ Welcome message updated.",
            Self::Goodbye => "✅ Goodbye message updated.",
        }
    }

    fn apply(self, cfg: &mut WelcomeConfig, text: String) {
        match self {
            Self::Welcome => cfg.welcome_message = text,
            Self::Goodbye => cfg.goodbye_message = text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingInput(TemplateField),
}

/// What a click did; returned for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Not a menu button, or an unknown trigger.
    Unrecognized,
    Expired,
    NotOpener,
    Busy,
    Prompted(TemplateField),
    Applied(MenuTrigger),
    SaveFailed,
    Previewed,
}

pub fn custom_id(menu_id: Uuid, trigger: MenuTrigger) -> String {
    format!("{CUSTOM_ID_PREFIX}:{menu_id}:{}", trigger.as_str())
}

pub fn parse_custom_id(raw: &str) -> Option<(Uuid, MenuTrigger)> {
    let mut parts = raw.splitn(3, ':');
    if parts.next()? != CUSTOM_ID_PREFIX {
        return None;
    }
    let menu_id = parts.next()?.parse().ok()?;
    let trigger = MenuTrigger::parse(parts.next()?)?;
    Some((menu_id, trigger))
}

pub fn menu_buttons(menu_id: Uuid) -> Vec<Button> {
    MenuTrigger::ALL
        .into_iter()
        .map(|trigger| Button {
            custom_id: custom_id(menu_id, trigger),
            label: trigger.label().to_string(),
            style: trigger.style(),
        })
        .collect()
}

pub fn menu_card(cfg: &WelcomeConfig) -> RichCard {
    let channel = cfg
        .welcome_channel_id
        .map_or_else(|| "Not Set".to_string(), |id| format!("<#{id}>"));
    RichCard::new("👋 Welcome & Goodbye Menu", 0x1a_bc_9c)
        .description("Use the buttons below to configure settings.")
        .field("Current Welcome", &cfg.welcome_message, false)
        .field("Current Goodbye", &cfg.goodbye_message, false)
        .field("Channel", channel, false)
        .field(
            "Enabled",
            format!(
                "Welcome: {} | Goodbye: {}",
                cfg.welcome_enabled, cfg.goodbye_enabled
            ),
            false,
        )
}

pub fn preview_card(cfg: &WelcomeConfig, user: &str, guild: &str) -> RichCard {
    RichCard::new("👋 Preview", 0x95_a5_a6)
        .field("Welcome", render_template(&cfg.welcome_message, user, guild), false)
        .field("Goodbye", render_template(&cfg.goodbye_message, user, guild), false)
}

#[derive(Debug)]
struct MenuSession {
    opener: u64,
    opened_at: Instant,
    state: SessionState,
}

/// Open menus and pending text inputs.
pub struct WelcomeMenus {
    sessions: Mutex<HashMap<Uuid, MenuSession>>,
    waiters: TextWaiters,
    ttl: Duration,
    input_timeout: Duration,
}

impl Default for WelcomeMenus {
    fn default() -> Self {
        Self::new()
    }
}

impl WelcomeMenus {
    pub fn new() -> Self {
        Self::with_timeouts(MENU_TTL, INPUT_TIMEOUT)
    }

    fn with_timeouts(ttl: Duration, input_timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            waiters: TextWaiters::new(),
            ttl,
            input_timeout,
        }
    }

    pub fn waiters(&self) -> &TextWaiters {
        &self.waiters
    }

    pub fn state(&self, menu_id: Uuid) -> Option<SessionState> {
        self.sessions.lock().get(&menu_id).map(|s| s.state)
    }

    pub fn open_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Give a pending text input first pick of an inbound message.
    pub fn offer_message(&self, msg: InboundMessage) -> Option<InboundMessage> {
        self.waiters.offer(msg)
    }

    fn register(&self, opener: u64) -> Uuid {
        let now = Instant::now();
        let menu_id = Uuid::new_v4();
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| now.duration_since(s.opened_at) < self.ttl);
        sessions.insert(
            menu_id,
            MenuSession {
                opener,
                opened_at: now,
                state: SessionState::Idle,
            },
        );
        menu_id
    }

    /// Opener of a live menu; `None` when unknown or expired.
    fn live_opener(&self, menu_id: Uuid) -> Option<u64> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get(&menu_id)?;
        if Instant::now().duration_since(session.opened_at) >= self.ttl {
            sessions.remove(&menu_id);
            self.waiters.cancel_menu(menu_id);
            return None;
        }
        Some(session.opener)
    }

    fn set_state(&self, menu_id: Uuid, state: SessionState) {
        if let Some(session) = self.sessions.lock().get_mut(&menu_id) {
            session.state = state;
        }
    }
}

/// Post a fresh menu for the author of `msg`.
pub async fn open_menu(ctx: &Arc<BotContext>, msg: &InboundMessage) -> anyhow::Result<Uuid> {
    let menu_id = ctx.menus.register(msg.author.id);
    let card = menu_card(&ctx.store.welcome());
    let post = OutboundMessage::card(card)
        .buttons(menu_buttons(menu_id))
        .delete_after(ctx.menus.ttl);
    deliver(&ctx.channel, msg.channel_id, post).await?;
    tracing::info!(menu = %menu_id, opener = msg.author.id, "Welcome menu opened");
    Ok(menu_id)
}

async fn respond(ctx: &BotContext, interaction: &Interaction, reply: InteractionReply) {
    if let Err(e) = ctx.channel.respond_interaction(interaction, &reply).await {
        tracing::warn!("Interaction {} response failed: {e}", interaction.id);
    }
}

async fn followup(ctx: &BotContext, interaction: &Interaction, text: &str) {
    let reply = InteractionReply::ephemeral_text(text);
    if let Err(e) = ctx.channel.followup(interaction, &reply).await {
        tracing::warn!("Interaction {} followup failed: {e}", interaction.id);
    }
}

/// Handle a button click on a welcome menu.
pub async fn handle_click(ctx: &Arc<BotContext>, interaction: Interaction) -> ClickOutcome {
    let Some((menu_id, trigger)) = parse_custom_id(&interaction.custom_id) else {
        return ClickOutcome::Unrecognized;
    };

    let Some(opener) = ctx.menus.live_opener(menu_id) else {
        respond(ctx, &interaction, InteractionReply::ephemeral_text(EXPIRED_NOTICE)).await;
        return ClickOutcome::Expired;
    };
    if opener != interaction.actor.id {
        respond(ctx, &interaction, InteractionReply::ephemeral_text(NOT_OPENER_NOTICE)).await;
        return ClickOutcome::NotOpener;
    }

    let actor = &interaction.actor;
    if let Some(field) = trigger.template_field() {
        return prompt_for_text(ctx, interaction, menu_id, field).await;
    }

    match trigger {
        MenuTrigger::SetChannel => {
            let channel_id = interaction.channel_id;
            if ctx
                .store
                .update_welcome(|cfg| cfg.welcome_channel_id = Some(channel_id))
                .is_err()
            {
                respond(ctx, &interaction, InteractionReply::ephemeral_text(SAVE_FAILED_NOTICE)).await;
                return ClickOutcome::SaveFailed;
            }
            respond(
                ctx,
                &interaction,
                InteractionReply::ephemeral_text(format!(
                    "✅ Welcome/goodbye channel set to <#{channel_id}>"
                )),
            )
            .await;
            ctx.audit
                .record(
                    AuditKind::Command,
                    format!("⚙️ {} set welcome/goodbye channel to <#{channel_id}>", actor.name),
                )
                .await;
        }
        MenuTrigger::Preview => {
            let guild = interaction
                .guild
                .as_ref()
                .map(|g| g.name.as_str())
                .unwrap_or_default();
            let card = preview_card(&ctx.store.welcome(), &actor.mention(), guild);
            respond(ctx, &interaction, InteractionReply::ephemeral_card(card)).await;
            return ClickOutcome::Previewed;
        }
        MenuTrigger::Toggle => {
            let Ok(enabled) = ctx.store.update_welcome(WelcomeConfig::toggle) else {
                respond(ctx, &interaction, InteractionReply::ephemeral_text(SAVE_FAILED_NOTICE)).await;
                return ClickOutcome::SaveFailed;
            };
            let state = if enabled { "ON" } else { "OFF" };
            respond(
                ctx,
                &interaction,
                InteractionReply::ephemeral_text(format!("🔄 Welcome/Goodbye toggled **{state}**.")),
            )
            .await;
            ctx.audit
                .record(
                    AuditKind::Command,
                    format!("⚙️ {} toggled welcome/goodbye to {state}", actor.name),
                )
                .await;
        }
        MenuTrigger::Reset => {
            ctx.menus.waiters.cancel_menu(menu_id);
            ctx.menus.set_state(menu_id, SessionState::Idle);
            if ctx.store.update_welcome(WelcomeConfig::reset).is_err() {
                respond(ctx, &interaction, InteractionReply::ephemeral_text(SAVE_FAILED_NOTICE)).await;
                return ClickOutcome::SaveFailed;
            }
            respond(
                ctx,
                &interaction,
                InteractionReply::ephemeral_text("♻️ Welcome/goodbye settings reset to default."),
            )
            .await;
            ctx.audit
                .record(
                    AuditKind::Command,
                    format!("⚙️ {} reset welcome/goodbye settings", actor.name),
                )
                .await;
        }
        MenuTrigger::SetWelcomeText | MenuTrigger::SetGoodbyeText => {
            return ClickOutcome::Unrecognized;
        }
    }

    ClickOutcome::Applied(trigger)
}

async fn prompt_for_text(
    ctx: &Arc<BotContext>,
    interaction: Interaction,
    menu_id: Uuid,
    field: TemplateField,
) -> ClickOutcome {
    let waiter = match ctx
        .menus
        .waiters
        .register(interaction.channel_id, interaction.actor.id, menu_id)
    {
        Ok(waiter) => waiter,
        Err(AlreadyWaiting) => {
            respond(ctx, &interaction, InteractionReply::ephemeral_text(BUSY_NOTICE)).await;
            return ClickOutcome::Busy;
        }
    };

    ctx.menus
        .set_state(menu_id, SessionState::AwaitingInput(field));
    respond(ctx, &interaction, InteractionReply::ephemeral_text(field.prompt())).await;

    let task_ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        await_text(task_ctx, interaction, menu_id, field, waiter).await;
    });

    ClickOutcome::Prompted(field)
}

async fn await_text(
    ctx: Arc<BotContext>,
    interaction: Interaction,
    menu_id: Uuid,
    field: TemplateField,
    waiter: Waiter,
) {
    let Waiter { id, key, receiver } = waiter;
    let received = tokio::time::timeout(ctx.menus.input_timeout, receiver).await;
    ctx.menus.waiters.release(key, id);
    ctx.menus.set_state(menu_id, SessionState::Idle);

    let captured = match received {
        Ok(Ok(captured)) => captured,
        Ok(Err(_)) => {
            tracing::debug!(menu = %menu_id, "Text input cancelled");
            return;
        }
        Err(_) => {
            tracing::info!(menu = %menu_id, actor = interaction.actor.id, "Text input timed out");
            followup(&ctx, &interaction, TIMEOUT_NOTICE).await;
            return;
        }
    };

    let text = captured.content.clone();
    if let Err(e) = ctx.store.update_welcome(|cfg| field.apply(cfg, text)) {
        tracing::error!("Saving {} message failed: {e}", field.noun());
        followup(&ctx, &interaction, SAVE_FAILED_NOTICE).await;
        return;
    }

    if let Err(e) = ctx.channel.delete_message(captured.message_ref()).await {
        tracing::debug!("Could not delete captured message {}: {e}", captured.id);
    }
    followup(&ctx, &interaction, field.updated_notice()).await;
    ctx.audit
        .record(
            AuditKind::Command,
            format!("⚙️ {} set {} message", interaction.actor.name, field.noun()),
        )
        .await;
}
