//! Audit trail posted to the configured log channel.
//!
//! Every entry also goes to `tracing`, so a bot without a log channel still
//! leaves a record in the process log.

use crate::channels::{Channel, OutboundMessage, RichCard};
use crate::util::ph_time_now;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Info,
    Command,
    Error,
    Restart,
    Role,
}

impl AuditKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Command => "COMMAND",
            Self::Error => "ERROR",
            Self::Restart => "RESTART",
            Self::Role => "ROLE",
        }
    }

    pub fn color(self) -> u32 {
        match self {
            Self::Info => 0x2e_cc_71,
            Self::Command => 0x34_98_db,
            Self::Error => 0xe7_4c_3c,
            Self::Restart => 0xf1_c4_0f,
            Self::Role => 0x9b_59_b6,
        }
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Self::Info => "ℹ️",
            Self::Command => "📝",
            Self::Error => "❌",
            Self::Restart => "♻️",
            Self::Role => "🎭",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn audit_card(kind: AuditKind, message: &str) -> RichCard {
    RichCard::new(format!("{} {kind} Log", kind.glyph()), kind.color())
        .description(message)
        .timestamp(Utc::now())
        .footer(format!("Logged at {} (PH Time)", ph_time_now()))
}

pub fn audit_fallback_text(kind: AuditKind, message: &str) -> String {
    format!("{} {kind} Log — {message}", kind.glyph())
}

#[derive(Clone)]
pub struct AuditLog {
    channel: Arc<dyn Channel>,
    log_channel_id: Option<u64>,
}

impl AuditLog {
    pub fn new(channel: Arc<dyn Channel>, log_channel_id: Option<u64>) -> Self {
        Self {
            channel,
            log_channel_id,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.log_channel_id.is_some()
    }

    /// Post an entry. Falls back to plain text when the card is rejected;
    /// never fails.
    pub async fn record(&self, kind: AuditKind, message: impl Into<String>) {
        let message = message.into();
        match kind {
            AuditKind::Error => tracing::warn!(target: "audit", kind = %kind, "{message}"),
            _ => tracing::info!(target: "audit", kind = %kind, "{message}"),
        }

        let Some(log_channel_id) = self.log_channel_id else {
            return;
        };

        let card = OutboundMessage::card(audit_card(kind, &message));
        if self.channel.send_message(log_channel_id, &card).await.is_ok() {
            return;
        }
        let text = OutboundMessage::text(audit_fallback_text(kind, &message));
        if let Err(e) = self.channel.send_message(log_channel_id, &text).await {
            tracing::debug!("Audit log delivery failed: {e}");
        }
    }
}
