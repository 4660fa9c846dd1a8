use super::{Access, Args, CommandError, CommandId, REGISTRY};
use crate::alerts::AlertCode;
use crate::bot::BotContext;
use crate::channels::{deliver, GuildRole, InboundMessage, OutboundMessage, RichCard};
use crate::config::{MAX_RESTART_INTERVAL_SECS, MAX_SHUTDOWN_MINUTES, MIN_RESTART_INTERVAL_SECS};
use crate::lifecycle::{RestartReason, TimerKind};
use crate::observability::AuditKind;
use crate::util::{join_or_none, ph_time_now};
use std::sync::Arc;
use std::time::Duration;

const SHORT_TTL: Duration = Duration::from_secs(10);

const STAFF_HELP: &[(&str, &str)] = &[
    ("restart", "Manual restart (30s cooldown)"),
    ("lastrestart", "Show last restart"),
    ("setrestarttime <min>", "Set auto-restart interval (5-720)"),
    ("showrestarttime", "Show current interval"),
    ("addrole <role>", "Add allowed staff role (name or mention)"),
    ("removerole <role>", "Remove allowed staff role (name or mention)"),
    ("listroles", "List allowed staff roles"),
    ("setshutdowntime <min>", "Set the default delay for !shutdown (0-10080)"),
    ("cheatsheet", "Quick reference"),
    ("welcomemenu", "Interactive welcome & goodbye menu"),
    ("shutdown <minutes?>", "Owner-only timed shutdown"),
];

pub(super) async fn run(
    ctx: &Arc<BotContext>,
    id: CommandId,
    args: Args,
    msg: &InboundMessage,
) -> Result<(), CommandError> {
    match id {
        CommandId::Status => status(ctx, msg).await,
        CommandId::PublicStatus => public_status(ctx, msg).await,
        CommandId::Config => config(ctx, msg).await,
        CommandId::Help => help(ctx, msg).await,
        CommandId::Notifier => notifier(ctx, msg).await,
        CommandId::WelcomeMenu => crate::session::open_menu(ctx, msg)
            .await
            .map(|_| ())
            .map_err(CommandError::delivery),
        CommandId::StaffHelp => staff_help(ctx, msg).await,
        CommandId::Cheatsheet => cheatsheet(ctx, msg).await,
        CommandId::Restart => restart(ctx, msg).await,
        CommandId::LastRestart => last_restart(ctx, msg).await,
        CommandId::SetRestartTime => set_restart_time(ctx, msg, int_arg(&args)).await,
        CommandId::ShowRestartTime => show_restart_time(ctx, msg).await,
        CommandId::AddRole => add_role(ctx, msg, text_arg(&args)).await,
        CommandId::RemoveRole => remove_role(ctx, msg, text_arg(&args)).await,
        CommandId::ListRoles => list_roles(ctx, msg).await,
        CommandId::SetShutdownTime => set_shutdown_time(ctx, msg, int_arg(&args)).await,
        CommandId::Shutdown => shutdown(ctx, msg, int_arg(&args)).await,
    }
}

fn int_arg(args: &Args) -> Option<i64> {
    match args {
        Args::Int(n) => *n,
        _ => None,
    }
}

fn text_arg(args: &Args) -> &str {
    match args {
        Args::Text(s) => s,
        _ => "",
    }
}

async fn send(
    ctx: &BotContext,
    msg: &InboundMessage,
    out: OutboundMessage,
) -> Result<(), CommandError> {
    deliver(&ctx.channel, msg.channel_id, out)
        .await
        .map(|_| ())
        .map_err(CommandError::delivery)
}

async fn audit_ran(ctx: &BotContext, msg: &InboundMessage, command: &str) {
    ctx.audit
        .record(
            AuditKind::Command,
            format!("[{}] {} ran !{command}", ph_time_now(), msg.author.name),
        )
        .await;
}

// ── Public ───────────────────────────────────────────────────────

async fn status(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let last_ping = crate::health::runtime_facts()
        .last_self_ping
        .unwrap_or_else(|| "Never".into());
    let card = RichCard::new("📊 Bot Status", 0x00_ff_cc)
        .field("Bot Online", "✅ Yes", false)
        .field("Servers", ctx.channel.guild_count().to_string(), true)
        .field("Last Self-Ping", last_ping, true);
    send(
        ctx,
        msg,
        OutboundMessage::card(card).delete_after(Duration::from_secs(20)),
    )
    .await
}

async fn public_status(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let minutes = ctx.store.operational().restart_interval_minutes();
    let last = crate::health::runtime_facts()
        .last_restart
        .unwrap_or_else(|| "No restart recorded yet".into());
    let card = RichCard::new("📊 Public Status", 0x34_98_db)
        .field("Auto-Restart Interval", format!("{minutes} minutes"), false)
        .field("Last Restart", last, false);
    send(ctx, msg, OutboundMessage::card(card)).await?;
    audit_ran(ctx, msg, "publicstatus").await;
    Ok(())
}

async fn config(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let operational = ctx.store.operational();
    let card = RichCard::new("⚙️ Bot Configuration", 0x00_ff_cc)
        .field(
            "Restart Interval",
            format!("{} minutes", operational.restart_interval_minutes()),
            false,
        )
        .field("Allowed Roles", join_or_none(&operational.allowed_roles), false);
    send(ctx, msg, OutboundMessage::card(card)).await?;
    audit_ran(ctx, msg, "config").await;
    Ok(())
}

async fn help(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let public = REGISTRY
        .iter()
        .filter(|spec| spec.access == Access::Public && !spec.hidden)
        .map(|spec| format!("`!{}`", spec.name))
        .collect::<Vec<_>>()
        .join(", ");
    let card = RichCard::new("📖 Help", 0x00_ff_cc)
        .field("Public", public, false)
        .footer("Staff commands: use !staffhelp");
    send(ctx, msg, OutboundMessage::card(card)).await
}

pub fn notifier_card() -> RichCard {
    AlertCode::ALL
        .into_iter()
        .fold(
            RichCard::new("📖 CODE Help", 0x00_ff_cc).description("Available CODE alerts:"),
            |card, code| card.field(format!("{} CODE {code}", code.glyph()), code.label(), false),
        )
        .footer("Usage: CODE <COLOR> : optional note")
}

async fn notifier(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    send(
        ctx,
        msg,
        OutboundMessage::card(notifier_card()).delete_after(Duration::from_secs(20)),
    )
    .await
}

// ── Staff ────────────────────────────────────────────────────────

async fn staff_help(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let lines = STAFF_HELP
        .iter()
        .map(|(usage, summary)| format!("!{usage} → {summary}"))
        .collect::<Vec<_>>()
        .join("\n");
    let card = RichCard::new("🛠️ Staff Help", 0xff_cc_00).field("Staff Commands", lines, false);
    send(
        ctx,
        msg,
        OutboundMessage::card(card).delete_after(Duration::from_secs(25)),
    )
    .await?;
    audit_ran(ctx, msg, "staffhelp").await;
    Ok(())
}

async fn cheatsheet(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let card =
        RichCard::new("📖 Cheatsheet", 0x72_89_da).field("Commands", "See !staffhelp for list", false);
    send(
        ctx,
        msg,
        OutboundMessage::card(card).delete_after(Duration::from_secs(20)),
    )
    .await?;
    audit_ran(ctx, msg, "cheatsheet").await;
    Ok(())
}

async fn restart(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    crate::health::record_restart(ph_time_now());
    if let Err(e) = send(
        ctx,
        msg,
        OutboundMessage::text("♻️ Restarting bot...").delete_after(SHORT_TTL),
    )
    .await
    {
        tracing::warn!("Restart notice not delivered: {e}");
    }
    ctx.audit
        .record(
            AuditKind::Restart,
            format!("♻️ Bot restart requested by {}", msg.author.name),
        )
        .await;
    ctx.lifecycle.request_restart(RestartReason::Manual);
    Ok(())
}

async fn last_restart(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let out = match crate::health::runtime_facts().last_restart {
        Some(at) => OutboundMessage::text(format!("♻️ Last restart: **{at}**"))
            .delete_after(Duration::from_secs(15)),
        None => OutboundMessage::text("❌ No restart recorded yet.").delete_after(SHORT_TTL),
    };
    send(ctx, msg, out).await?;
    audit_ran(ctx, msg, "lastrestart").await;
    Ok(())
}

async fn set_restart_time(
    ctx: &BotContext,
    msg: &InboundMessage,
    minutes: Option<i64>,
) -> Result<(), CommandError> {
    let min = (MIN_RESTART_INTERVAL_SECS / 60) as i64;
    let max = (MAX_RESTART_INTERVAL_SECS / 60) as i64;
    let minutes = minutes
        .filter(|m| (min..=max).contains(m))
        .ok_or_else(|| {
            CommandError::Validation(format!("❌ Value must be between {min} and {max} minutes."))
        })?;

    let secs = minutes as u64 * 60;
    ctx.store
        .update_operational(|cfg| cfg.restart_interval = secs)?;
    ctx.lifecycle
        .arm(TimerKind::AutoRestart, Duration::from_secs(secs));

    send(
        ctx,
        msg,
        OutboundMessage::text(format!("✅ Auto-restart interval set to {minutes} minutes."))
            .delete_after(SHORT_TTL),
    )
    .await?;
    ctx.audit
        .record(
            AuditKind::Role,
            format!(
                "⚙️ Restart interval changed to {minutes}m by {}",
                msg.author.name
            ),
        )
        .await;
    Ok(())
}

async fn show_restart_time(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let minutes = ctx.store.operational().restart_interval_minutes();
    send(
        ctx,
        msg,
        OutboundMessage::text(format!(
            "⏱️ Current auto-restart interval: **{minutes} minutes**"
        ))
        .delete_after(SHORT_TTL),
    )
    .await?;
    audit_ran(ctx, msg, "showrestarttime").await;
    Ok(())
}

/// Resolve a role argument: first role mention, then numeric id, then a
/// case-insensitive name match against the guild's roles.
pub fn resolve_role(roles: &[GuildRole], role_mentions: &[u64], input: &str) -> Option<GuildRole> {
    if let Some(mentioned) = role_mentions.first() {
        return roles.iter().find(|r| r.id == *mentioned).cloned();
    }
    let input = input.trim();
    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        let id: u64 = input.parse().ok()?;
        return roles.iter().find(|r| r.id == id).cloned();
    }
    roles
        .iter()
        .find(|r| r.name.to_lowercase() == input.to_lowercase())
        .cloned()
}

fn guild_roles(ctx: &BotContext, msg: &InboundMessage) -> Result<Vec<GuildRole>, CommandError> {
    let guild = msg.guild.as_ref().ok_or_else(|| {
        CommandError::Validation("❌ This command only works in a server.".into())
    })?;
    Ok(ctx.channel.guild_roles(guild.id))
}

async fn add_role(ctx: &BotContext, msg: &InboundMessage, input: &str) -> Result<(), CommandError> {
    let roles = guild_roles(ctx, msg)?;
    let role = resolve_role(&roles, &msg.role_mentions, input).ok_or_else(|| {
        CommandError::Validation("❌ Role not found. Use role mention, id, or exact name.".into())
    })?;

    if !ctx.store.update_operational(|cfg| cfg.add_role(&role.name))? {
        return Err(CommandError::Validation(format!(
            "❌ Role `{}` already allowed.",
            role.name
        )));
    }

    send(
        ctx,
        msg,
        OutboundMessage::text(format!("✅ Role `{}` added to allowed roles.", role.name))
            .delete_after(SHORT_TTL),
    )
    .await?;
    ctx.audit
        .record(
            AuditKind::Role,
            format!(
                "⚙️ {} added role `{}` to allowed roles.",
                msg.author.name, role.name
            ),
        )
        .await;
    Ok(())
}

async fn remove_role(
    ctx: &BotContext,
    msg: &InboundMessage,
    input: &str,
) -> Result<(), CommandError> {
    let roles = guild_roles(ctx, msg)?;
    // A role deleted from the guild can still be dropped by its stored name.
    let name = resolve_role(&roles, &msg.role_mentions, input)
        .map(|r| r.name)
        .unwrap_or_else(|| input.trim().to_string());

    if !ctx.store.update_operational(|cfg| cfg.remove_role(&name))? {
        return Err(CommandError::Validation("❌ Role not in allowed list.".into()));
    }

    send(
        ctx,
        msg,
        OutboundMessage::text(format!("✅ Role `{name}` removed from allowed roles."))
            .delete_after(SHORT_TTL),
    )
    .await?;
    ctx.audit
        .record(
            AuditKind::Role,
            format!(
                "⚙️ {} removed role `{name}` from allowed roles.",
                msg.author.name
            ),
        )
        .await;
    Ok(())
}

async fn list_roles(ctx: &BotContext, msg: &InboundMessage) -> Result<(), CommandError> {
    let roles = join_or_none(&ctx.store.operational().allowed_roles);
    send(
        ctx,
        msg,
        OutboundMessage::text(format!("📋 Allowed roles: **{roles}**"))
            .delete_after(Duration::from_secs(15)),
    )
    .await?;
    audit_ran(ctx, msg, "listroles").await;
    Ok(())
}

/// Shutdown delay in minutes: negatives clamp to 0, anything above
/// [`MAX_SHUTDOWN_MINUTES`] is rejected.
fn shutdown_minutes(minutes: i64) -> Result<u64, CommandError> {
    let minutes = minutes.max(0).unsigned_abs();
    if minutes > MAX_SHUTDOWN_MINUTES {
        return Err(CommandError::Validation(format!(
            "❌ Value must be between 0 and {MAX_SHUTDOWN_MINUTES} minutes."
        )));
    }
    Ok(minutes)
}

async fn set_shutdown_time(
    ctx: &BotContext,
    msg: &InboundMessage,
    minutes: Option<i64>,
) -> Result<(), CommandError> {
    let minutes = shutdown_minutes(minutes.unwrap_or_default())?;
    ctx.store
        .update_operational(|cfg| cfg.shutdown_default_minutes = minutes)?;
    send(
        ctx,
        msg,
        OutboundMessage::text(format!("✅ Default shutdown time set to {minutes} minute(s)."))
            .delete_after(SHORT_TTL),
    )
    .await?;
    ctx.audit
        .record(
            AuditKind::Role,
            format!(
                "⚙️ {} set default shutdown time to {minutes}m",
                msg.author.name
            ),
        )
        .await;
    Ok(())
}

// ── Owner ────────────────────────────────────────────────────────

async fn shutdown(
    ctx: &BotContext,
    msg: &InboundMessage,
    minutes: Option<i64>,
) -> Result<(), CommandError> {
    let minutes = match minutes {
        Some(m) => shutdown_minutes(m)?,
        None => ctx.store.operational().shutdown_default_minutes,
    };

    // The replacement restart is armed before the periodic one is dropped.
    ctx.lifecycle.arm(
        TimerKind::DelayedShutdown,
        Duration::from_secs(minutes.saturating_mul(60)),
    );
    ctx.lifecycle.cancel(TimerKind::AutoRestart);

    if let Err(e) = send(
        ctx,
        msg,
        OutboundMessage::text(format!(
            "🛑 Shutting down. Bot will attempt to restart in {minutes} minute(s)."
        ))
        .delete_after(SHORT_TTL),
    )
    .await
    {
        tracing::warn!("Shutdown notice not delivered: {e}");
    }
    ctx.audit
        .record(
            AuditKind::Restart,
            format!(
                "🛑 Shutdown initiated by {}, restart in {minutes}m",
                msg.author.name
            ),
        )
        .await;

    ctx.channel.close().await;
    Ok(())
}
