//! Prefix command router.
//!
//! Every command is described by a [`CommandSpec`] in [`REGISTRY`]. Routing a
//! message runs the same gates in the same order for every command:
//! authorization, argument parsing, cooldown, then the handler. A rejection
//! at any gate produces one short-lived notice and nothing else. The
//! triggering message is removed afterwards whatever the outcome.

pub mod handlers;

use crate::bot::BotContext;
use crate::channels::{deliver, InboundMessage, OutboundMessage};
use crate::config::StoreError;
use crate::security::{AccessRule, CooldownPolicy};
use std::sync::Arc;
use std::time::Duration;

pub const PREFIX: char = '!';

/// Lifetime of rejection notices.
pub const NOTICE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    /// Owner, Manage Server, or an allow-listed role.
    Staff,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandId {
    Status,
    PublicStatus,
    Config,
    Help,
    Notifier,
    WelcomeMenu,
    StaffHelp,
    Cheatsheet,
    Restart,
    LastRestart,
    SetRestartTime,
    ShowRestartTime,
    AddRole,
    RemoveRole,
    ListRoles,
    SetShutdownTime,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSpec {
    None,
    /// First whitespace token as a signed integer.
    Int { required: bool },
    /// Everything after the command name, trimmed. Required.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Args {
    None,
    Int(Option<i64>),
    Text(String),
}

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub id: CommandId,
    pub name: &'static str,
    pub access: Access,
    pub cooldown: Option<CooldownPolicy>,
    pub args: ArgSpec,
    pub usage: &'static str,
    /// Left out of `!help`.
    pub hidden: bool,
}

const fn spec(
    id: CommandId,
    name: &'static str,
    access: Access,
    args: ArgSpec,
    usage: &'static str,
) -> CommandSpec {
    CommandSpec {
        id,
        name,
        access,
        cooldown: None,
        args,
        usage,
        hidden: !matches!(access, Access::Public),
    }
}

const fn with_cooldown(mut spec: CommandSpec, policy: CooldownPolicy) -> CommandSpec {
    spec.cooldown = Some(policy);
    spec
}

const REQUIRED_INT: ArgSpec = ArgSpec::Int { required: true };

pub static REGISTRY: &[CommandSpec] = &[
    spec(CommandId::Status, "status", Access::Public, ArgSpec::None, "!status"),
    spec(CommandId::PublicStatus, "publicstatus", Access::Public, ArgSpec::None, "!publicstatus"),
    spec(CommandId::Config, "config", Access::Public, ArgSpec::None, "!config"),
    spec(CommandId::Help, "help", Access::Public, ArgSpec::None, "!help"),
    spec(CommandId::Notifier, "notifier", Access::Public, ArgSpec::None, "!notifier"),
    spec(CommandId::WelcomeMenu, "welcomemenu", Access::Public, ArgSpec::None, "!welcomemenu"),
    spec(CommandId::StaffHelp, "staffhelp", Access::Staff, ArgSpec::None, "!staffhelp"),
    spec(CommandId::Cheatsheet, "cheatsheet", Access::Staff, ArgSpec::None, "!cheatsheet"),
    with_cooldown(
        spec(CommandId::Restart, "restart", Access::Staff, ArgSpec::None, "!restart"),
        CooldownPolicy::per_actor(1, 30),
    ),
    with_cooldown(
        spec(CommandId::LastRestart, "lastrestart", Access::Staff, ArgSpec::None, "!lastrestart"),
        CooldownPolicy::per_actor(1, 30),
    ),
    spec(
        CommandId::SetRestartTime,
        "setrestarttime",
        Access::Staff,
        REQUIRED_INT,
        "!setrestarttime <minutes>",
    ),
    spec(
        CommandId::ShowRestartTime,
        "showrestarttime",
        Access::Staff,
        ArgSpec::None,
        "!showrestarttime",
    ),
    spec(CommandId::AddRole, "addrole", Access::Staff, ArgSpec::Text, "!addrole <role>"),
    spec(CommandId::RemoveRole, "removerole", Access::Staff, ArgSpec::Text, "!removerole <role>"),
    spec(CommandId::ListRoles, "listroles", Access::Staff, ArgSpec::None, "!listroles"),
    spec(
        CommandId::SetShutdownTime,
        "setshutdowntime",
        Access::Staff,
        REQUIRED_INT,
        "!setshutdowntime <minutes>",
    ),
    spec(
        CommandId::Shutdown,
        "shutdown",
        Access::Owner,
        ArgSpec::Int { required: false },
        "!shutdown [minutes]",
    ),
];

pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    REGISTRY.iter().find(|spec| spec.name == name)
}

/// Names must be unique, lowercase and non-empty.
pub fn validate_registry(registry: &[CommandSpec]) -> Result<(), String> {
    for (i, spec) in registry.iter().enumerate() {
        if spec.name.is_empty() || spec.name.chars().any(|c| !c.is_ascii_lowercase()) {
            return Err(format!("invalid command name {:?}", spec.name));
        }
        if registry[..i].iter().any(|other| other.name == spec.name) {
            return Err(format!("duplicate command name {:?}", spec.name));
        }
        if registry[..i].iter().any(|other| other.id == spec.id) {
            return Err(format!("duplicate command id {:?}", spec.id));
        }
    }
    Ok(())
}

/// A prefixed message split into command name and raw argument string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation<'a> {
    pub name: &'a str,
    pub rest: &'a str,
}

pub fn parse_invocation(content: &str) -> Option<Invocation<'_>> {
    let body = content.strip_prefix(PREFIX)?;
    let body = body.trim_start();
    let (name, rest) = match body.find(char::is_whitespace) {
        Some(pos) => (&body[..pos], body[pos..].trim()),
        None => (body, ""),
    };
    if name.is_empty() {
        return None;
    }
    Some(Invocation { name, rest })
}

pub fn parse_args(spec: &CommandSpec, rest: &str) -> Result<Args, CommandError> {
    match spec.args {
        ArgSpec::None => Ok(Args::None),
        ArgSpec::Int { required } => match rest.split_whitespace().next() {
            None if required => Err(CommandError::Validation(format!(
                "❌ Missing argument. Usage: `{}`",
                spec.usage
            ))),
            None => Ok(Args::Int(None)),
            Some(token) => token.parse().map(|n| Args::Int(Some(n))).map_err(|_| {
                CommandError::Validation(format!(
                    "❌ `{token}` is not a whole number. Usage: `{}`",
                    spec.usage
                ))
            }),
        },
        ArgSpec::Text if rest.is_empty() => Err(CommandError::Validation(format!(
            "❌ Missing argument. Usage: `{}`",
            spec.usage
        ))),
        ArgSpec::Text => Ok(Args::Text(rest.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("authorization denied")]
    AuthorizationDenied { owner_only: bool },
    #[error("{0}")]
    Validation(String),
    #[error("on cooldown for another {retry_after:?}")]
    Cooldown { retry_after: Duration },
    #[error(transparent)]
    Persistence(#[from] StoreError),
    #[error("delivery failed: {0}")]
    Delivery(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CommandError {
    pub fn delivery(err: anyhow::Error) -> Self {
        Self::Delivery(format!("{err:#}"))
    }

    /// Text shown to the invoking member, if any.
    pub fn user_notice(&self) -> Option<String> {
        match self {
            Self::AuthorizationDenied { owner_only: true } => {
                Some("❌ Only the bot owner can use this command.".into())
            }
            Self::AuthorizationDenied { owner_only: false } => {
                Some("❌ You do not have permission to use this command.".into())
            }
            Self::Validation(msg) => Some(msg.clone()),
            Self::Cooldown { retry_after } => Some(format!(
                "⏳ This command is on cooldown. Try again in {:.1}s.",
                retry_after.as_secs_f64()
            )),
            Self::Persistence(_) => Some("❌ Could not save the change. Please try again.".into()),
            Self::Delivery(_) => None,
            Self::Internal(_) => {
                Some("❌ Something went wrong while running this command.".into())
            }
        }
    }
}

#[derive(Debug)]
pub enum RouteOutcome {
    /// No prefix.
    NotCommand,
    Unknown,
    Completed(CommandId),
    Rejected(CommandId, CommandError),
}

fn authorize(ctx: &BotContext, spec: &CommandSpec, msg: &InboundMessage) -> Result<(), CommandError> {
    let allowed = match spec.access {
        Access::Public => true,
        Access::Owner => ctx.evaluator.is_owner(msg.author.id),
        Access::Staff => ctx.evaluator.is_authorized(
            msg.author.principal(),
            AccessRule::STAFF,
            &ctx.store.operational().allowed_roles,
        ),
    };
    if allowed {
        Ok(())
    } else {
        Err(CommandError::AuthorizationDenied {
            owner_only: spec.access == Access::Owner,
        })
    }
}

fn check_cooldown(ctx: &BotContext, spec: &CommandSpec, actor_id: u64) -> Result<(), CommandError> {
    match spec.cooldown {
        Some(policy) => ctx
            .cooldowns
            .try_acquire(actor_id, spec.name, policy)
            .map_err(|retry_after| CommandError::Cooldown { retry_after }),
        None => Ok(()),
    }
}

/// Route one inbound message through the command table.
pub async fn route(ctx: &Arc<BotContext>, msg: &InboundMessage) -> RouteOutcome {
    let Some(invocation) = parse_invocation(&msg.content) else {
        return RouteOutcome::NotCommand;
    };
    let Some(spec) = lookup(invocation.name) else {
        tracing::debug!(name = invocation.name, "Unknown command ignored");
        return RouteOutcome::Unknown;
    };

    let result = async {
        authorize(ctx, spec, msg)?;
        let args = parse_args(spec, invocation.rest)?;
        check_cooldown(ctx, spec, msg.author.id)?;
        handlers::run(ctx, spec.id, args, msg).await
    }
    .await;

    let outcome = match result {
        Ok(()) => {
            tracing::info!(command = spec.name, actor = msg.author.id, "Command completed");
            RouteOutcome::Completed(spec.id)
        }
        Err(err) => {
            report(ctx, spec, msg, &err).await;
            RouteOutcome::Rejected(spec.id, err)
        }
    };

    if let Err(e) = ctx.channel.delete_message(msg.message_ref()).await {
        tracing::debug!("Could not delete command message {}: {e}", msg.id);
    }
    outcome
}

async fn report(ctx: &BotContext, spec: &CommandSpec, msg: &InboundMessage, err: &CommandError) {
    match err {
        CommandError::Persistence(_) | CommandError::Internal(_) => {
            tracing::error!(command = spec.name, actor = msg.author.id, "Command failed: {err:#}");
        }
        CommandError::Delivery(_) => {
            tracing::warn!(command = spec.name, "Command reply not delivered: {err}");
        }
        _ => {
            tracing::info!(command = spec.name, actor = msg.author.id, "Command rejected: {err}");
        }
    }

    if let Some(notice) = err.user_notice() {
        let notice = OutboundMessage::text(notice).delete_after(NOTICE_TTL);
        if let Err(e) = deliver(&ctx.channel, msg.channel_id, notice).await {
            tracing::warn!("Failed to send rejection notice: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_valid() {
        validate_registry(REGISTRY).unwrap();
        assert_eq!(REGISTRY.len(), 17);
    }

    #[test]
    fn duplicate_names_are_caught() {
        let dup = [REGISTRY[0], REGISTRY[0]];
        assert!(validate_registry(&dup).is_err());
    }

    #[test]
    fn invocation_splits_name_and_rest() {
        assert_eq!(
            parse_invocation("!addrole  Night Shift "),
            Some(Invocation {
                name: "addrole",
                rest: "Night Shift"
            })
        );
        assert_eq!(
            parse_invocation("!status"),
            Some(Invocation {
                name: "status",
                rest: ""
            })
        );
        assert_eq!(parse_invocation("!"), None);
        assert_eq!(parse_invocation("status"), None);
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(lookup("status").is_some());
        assert!(lookup("STATUS").is_none());
    }

    #[test]
    fn access_levels_match_command_table() {
        let public: Vec<_> = REGISTRY
            .iter()
            .filter(|s| s.access == Access::Public)
            .map(|s| s.name)
            .collect();
        assert_eq!(
            public,
            ["status", "publicstatus", "config", "help", "notifier", "welcomemenu"]
        );
        assert_eq!(lookup("shutdown").unwrap().access, Access::Owner);
        assert!(lookup("restart").unwrap().cooldown.is_some());
        assert!(lookup("lastrestart").unwrap().cooldown.is_some());
        assert!(lookup("setrestarttime").unwrap().cooldown.is_none());
    }

    #[test]
    fn int_args_parse_first_token() {
        let spec = lookup("setrestarttime").unwrap();
        assert_eq!(parse_args(spec, "30 extra").unwrap(), Args::Int(Some(30)));
        assert_eq!(parse_args(spec, "-4").unwrap(), Args::Int(Some(-4)));
        assert!(matches!(
            parse_args(spec, ""),
            Err(CommandError::Validation(msg)) if msg.contains("!setrestarttime <minutes>")
        ));
        assert!(matches!(
            parse_args(spec, "soon"),
            Err(CommandError::Validation(msg)) if msg.contains("`soon`")
        ));
    }

    #[test]
    fn optional_int_may_be_absent() {
        let spec = lookup("shutdown").unwrap();
        assert_eq!(parse_args(spec, "").unwrap(), Args::Int(None));
    }

    #[test]
    fn text_args_keep_inner_spaces() {
        let spec = lookup("addrole").unwrap();
        assert_eq!(
            parse_args(spec, "Night Shift").unwrap(),
            Args::Text("Night Shift".into())
        );
        assert!(parse_args(spec, "").is_err());
    }

    #[test]
    fn notices_by_error_kind() {
        assert_eq!(
            CommandError::AuthorizationDenied { owner_only: true }
                .user_notice()
                .unwrap(),
            "❌ Only the bot owner can use this command."
        );
        assert!(CommandError::Cooldown {
            retry_after: Duration::from_millis(12_500)
        }
        .user_notice()
        .unwrap()
        .contains("12.5s"));
        assert!(CommandError::Delivery("gone".into()).user_notice().is_none());
    }
}
