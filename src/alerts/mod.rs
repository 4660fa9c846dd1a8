//! CODE alerts: `CODE <COLOR>` messages, optionally followed by `: <note>`,
//! re-posted as a colored card by authorized members.

use crate::channels::{deliver, Channel, InboundMessage, OutboundMessage, RichCard};
use crate::security::{AccessRule, PermissionEvaluator};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const TRIGGER: &str = "CODE ";
pub const NOTE_FIELD: &str = "📝 Note";
pub const UNAUTHORIZED_NOTICE: &str = "❌ You do not have permission to use CODE commands.";
pub const NOTICE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCode {
    Blue,
    Red,
    Green,
    Yellow,
    Orange,
    Purple,
    Black,
}

impl AlertCode {
    /// Table order, as shown by `!notifier`.
    pub const ALL: [Self; 7] = [
        Self::Blue,
        Self::Red,
        Self::Green,
        Self::Yellow,
        Self::Orange,
        Self::Purple,
        Self::Black,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blue => "BLUE",
            Self::Red => "RED",
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Orange => "ORANGE",
            Self::Purple => "PURPLE",
            Self::Black => "BLACK",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Blue => "MAY VERIFICATION",
            Self::Red => "PALDO",
            Self::Green => "NA LOOT NA",
            Self::Yellow => "MAY PAG ASA PA",
            Self::Orange => "NABUKSAN",
            Self::Purple => "SECURE",
            Self::Black => "BAN",
        }
    }

    pub fn color(self) -> u32 {
        match self {
            Self::Blue => 0x34_98_db,
            Self::Red => 0xe7_4c_3c,
            Self::Green => 0x2e_cc_71,
            Self::Yellow => 0xf1_c4_0f,
            Self::Orange => 0xe6_7e_22,
            Self::Purple => 0x9b_59_b6,
            Self::Black => 0x00_00_00,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Self::Blue => "🔹",
            Self::Red => "🔴",
            Self::Green => "🟢",
            Self::Yellow => "🟡",
            Self::Orange => "🟠",
            Self::Purple => "🟣",
            Self::Black => "⚫",
        }
    }
}

impl fmt::Display for AlertCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == wanted)
            .ok_or(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub code: AlertCode,
    /// Raw note text after the first `:`, trimmed; `None` when empty.
    pub note: Option<String>,
}

/// Whether `content` is addressed to the alert system at all.
pub fn is_alert_trigger(content: &str) -> bool {
    content
        .get(..TRIGGER.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(TRIGGER))
}

/// Classify a message. Unknown codes and non-alert messages yield `None`.
pub fn parse_alert(content: &str) -> Option<Alert> {
    if !is_alert_trigger(content) {
        return None;
    }
    let (code_part, note) = match content.split_once(':') {
        Some((code, note)) => (code, Some(note.trim())),
        None => (content, None),
    };
    let code = code_part.get(TRIGGER.len()..)?.parse().ok()?;
    Some(Alert {
        code,
        note: note.filter(|n| !n.is_empty()).map(str::to_string),
    })
}

/// Bold every `:word` token, dropping the marker. Whitespace collapses to
/// single spaces; a bare `:` stays as is.
pub fn render_note(note: &str) -> String {
    note.split_whitespace()
        .map(|word| match word.strip_prefix(':') {
            Some(rest) if !rest.is_empty() => format!("**{rest}**"),
            _ => word.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn alert_card(alert: &Alert) -> RichCard {
    let code = alert.code;
    let card = RichCard::new(format!("{} CODE {code}", code.glyph()), code.color())
        .description(code.label());
    match &alert.note {
        Some(note) => card.field(NOTE_FIELD, render_note(note), false),
        None => card,
    }
}

/// What happened to an inbound message offered to the alert system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertOutcome {
    /// Not a CODE message, or an unknown code.
    Ignored,
    Denied,
    Posted { code: AlertCode, replied: bool },
    /// Authorized, but the card could not be posted anywhere.
    Undelivered { code: AlertCode },
}

/// Parse, authorize and deliver a CODE alert.
///
/// Denied senders get a short-lived notice and their message stays. For
/// authorized senders the original is removed and the card is posted as a
/// reply to the message they replied to, or to the channel.
pub async fn dispatch_alert(
    channel: &Arc<dyn Channel>,
    evaluator: &PermissionEvaluator,
    allowed_roles: &[String],
    msg: &InboundMessage,
) -> AlertOutcome {
    let Some(alert) = parse_alert(&msg.content) else {
        return AlertOutcome::Ignored;
    };

    if !evaluator.is_authorized(msg.author.principal(), AccessRule::ALERT, allowed_roles) {
        tracing::info!(
            actor = msg.author.id,
            code = %alert.code,
            "CODE alert denied"
        );
        let notice = OutboundMessage::text(UNAUTHORIZED_NOTICE).delete_after(NOTICE_TTL);
        if let Err(e) = deliver(channel, msg.channel_id, notice).await {
            tracing::warn!("Failed to send CODE rejection notice: {e}");
        }
        return AlertOutcome::Denied;
    }

    if let Err(e) = channel.delete_message(msg.message_ref()).await {
        tracing::warn!("Failed to delete CODE message {}: {e}", msg.id);
    }

    let card = alert_card(&alert);
    if let Some(target) = msg.reply_to {
        let reply = OutboundMessage::card(card.clone()).reply_to(target);
        match channel.send_message(msg.channel_id, &reply).await {
            Ok(_) => {
                return AlertOutcome::Posted {
                    code: alert.code,
                    replied: true,
                }
            }
            Err(e) => tracing::warn!("CODE reply to {target} failed, posting to channel: {e}"),
        }
    }

    match channel
        .send_message(msg.channel_id, &OutboundMessage::card(card))
        .await
    {
        Ok(_) => AlertOutcome::Posted {
            code: alert.code,
            replied: false,
        },
        Err(e) => {
            tracing::warn!("Failed to post CODE {} card: {e}", alert.code);
            AlertOutcome::Undelivered { code: alert.code }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Actor, MemoryChannel, MessageRef};
    use crate::security::PermissionSet;

    const OWNER: u64 = 1;

    fn message(content: &str, author: Actor, reply_to: Option<u64>) -> InboundMessage {
        InboundMessage {
            id: 55,
            author,
            channel_id: 77,
            guild: None,
            content: content.into(),
            reply_to,
            role_mentions: vec![],
        }
    }

    fn member(id: u64, roles: &[&str], permissions: PermissionSet) -> Actor {
        Actor {
            id,
            name: format!("user{id}"),
            is_bot: false,
            role_names: roles.iter().map(|r| (*r).to_string()).collect(),
            permissions,
        }
    }

    fn allowed() -> Vec<String> {
        vec!["Staff".into(), "Admin".into(), "Moderator".into()]
    }

    #[test]
    fn parses_code_and_note() {
        let alert = parse_alert("CODE RED: urgent :help").unwrap();
        assert_eq!(alert.code, AlertCode::Red);
        assert_eq!(alert.note.as_deref(), Some("urgent :help"));
        assert_eq!(render_note(alert.note.as_deref().unwrap()), "urgent **help**");
    }

    #[test]
    fn trigger_and_code_are_case_insensitive() {
        assert_eq!(parse_alert("code blue").unwrap().code, AlertCode::Blue);
        assert_eq!(parse_alert("Code  purple  ").unwrap().code, AlertCode::Purple);
    }

    #[test]
    fn unknown_or_malformed_is_ignored() {
        assert!(parse_alert("CODE PINK").is_none());
        assert!(parse_alert("CODE").is_none());
        assert!(parse_alert("CODERED").is_none());
        assert!(parse_alert("the CODE RED is on").is_none());
        assert!(parse_alert("!code red").is_none());
    }

    #[test]
    fn empty_note_is_dropped() {
        assert_eq!(parse_alert("CODE GREEN:   ").unwrap().note, None);
    }

    #[test]
    fn note_splits_on_first_colon_only() {
        let alert = parse_alert("CODE BLACK: at 10:30 :now").unwrap();
        assert_eq!(render_note(alert.note.as_deref().unwrap()), "at 10:30 **now**");
    }

    #[test]
    fn bare_colon_token_stays_literal() {
        assert_eq!(render_note("a : b"), "a : b");
    }

    #[test]
    fn card_carries_code_metadata() {
        let card = alert_card(&parse_alert("CODE YELLOW: hold :steady").unwrap());
        assert_eq!(card.title, "🟡 CODE YELLOW");
        assert_eq!(card.description.as_deref(), Some("MAY PAG ASA PA"));
        assert_eq!(card.color, 0xf1c40f);
        assert_eq!(card.field_value(NOTE_FIELD), Some("hold **steady**"));

        let bare = alert_card(&parse_alert("CODE ORANGE").unwrap());
        assert!(bare.fields.is_empty());
    }

    #[tokio::test]
    async fn authorized_alert_deletes_original_and_posts_card() {
        let mem = Arc::new(MemoryChannel::new());
        let channel: Arc<dyn Channel> = mem.clone();
        let msg = message("CODE RED: urgent :help", member(5, &["Staff"], PermissionSet::default()), None);

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &allowed(), &msg).await;

        assert_eq!(
            outcome,
            AlertOutcome::Posted {
                code: AlertCode::Red,
                replied: false
            }
        );
        assert_eq!(
            mem.deleted(),
            vec![MessageRef {
                channel_id: 77,
                message_id: 55
            }]
        );
        let sent = mem.sent();
        let card = sent[0].1.card.as_ref().unwrap();
        assert_eq!(card.description.as_deref(), Some("PALDO"));
        assert_eq!(card.field_value(NOTE_FIELD), Some("urgent **help**"));
    }

    #[tokio::test]
    async fn unauthorized_alert_keeps_original() {
        let mem = Arc::new(MemoryChannel::new());
        let channel: Arc<dyn Channel> = mem.clone();
        let msg = message("CODE RED", member(5, &["Member"], PermissionSet::default()), None);

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &allowed(), &msg).await;

        assert_eq!(outcome, AlertOutcome::Denied);
        assert!(mem.deleted().is_empty());
        let sent = mem.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.content.as_deref(), Some(UNAUTHORIZED_NOTICE));
        assert_eq!(sent[0].1.delete_after, Some(NOTICE_TTL));
    }

    #[tokio::test]
    async fn owner_without_role_is_denied() {
        let mem = Arc::new(MemoryChannel::new());
        let channel: Arc<dyn Channel> = mem.clone();
        let msg = message("CODE RED", member(OWNER, &[], PermissionSet::default()), None);

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &allowed(), &msg).await;
        assert_eq!(outcome, AlertOutcome::Denied);
    }

    #[tokio::test]
    async fn manage_messages_is_enough() {
        let mem = Arc::new(MemoryChannel::new());
        let channel: Arc<dyn Channel> = mem.clone();
        let perms = PermissionSet {
            manage_guild: false,
            manage_messages: true,
        };
        let msg = message("CODE GREEN", member(5, &[], perms), None);

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &[], &msg).await;
        assert!(matches!(outcome, AlertOutcome::Posted { code: AlertCode::Green, .. }));
    }

    #[tokio::test]
    async fn reply_targets_referenced_message() {
        let mem = Arc::new(MemoryChannel::new());
        let channel: Arc<dyn Channel> = mem.clone();
        let msg = message("CODE BLUE", member(5, &["Admin"], PermissionSet::default()), Some(900));

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &allowed(), &msg).await;

        assert_eq!(
            outcome,
            AlertOutcome::Posted {
                code: AlertCode::Blue,
                replied: true
            }
        );
        assert_eq!(mem.sent()[0].1.reply_to, Some(900));
    }

    #[tokio::test]
    async fn failed_reply_falls_back_to_channel_post() {
        let mem = Arc::new(MemoryChannel::new());
        mem.fail_replies(true);
        let channel: Arc<dyn Channel> = mem.clone();
        let msg = message("CODE BLUE", member(5, &["Admin"], PermissionSet::default()), Some(900));

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &allowed(), &msg).await;

        assert_eq!(
            outcome,
            AlertOutcome::Posted {
                code: AlertCode::Blue,
                replied: false
            }
        );
        let sent = mem.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1.reply_to, None);
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let mem = Arc::new(MemoryChannel::new());
        mem.fail_sends(true);
        let channel: Arc<dyn Channel> = mem.clone();
        let msg = message("CODE BLACK", member(5, &["Staff"], PermissionSet::default()), None);

        let outcome = dispatch_alert(&channel, &PermissionEvaluator::new(OWNER), &allowed(), &msg).await;
        assert_eq!(outcome, AlertOutcome::Undelivered { code: AlertCode::Black });
    }
}
