//! Utility functions for `codewarden`.
//!
//! Small helpers shared by the command handlers, the audit log and the
//! Discord adapter.

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Manila;

/// Timestamp layout used for every human-facing time (`2024-05-01 13:37:00`).
pub const DISPLAY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current wall-clock time in Asia/Manila, formatted for display.
pub fn ph_time_now() -> String {
    format_ph_time(Utc::now())
}

/// Format a UTC instant as Asia/Manila local time.
pub fn format_ph_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Manila)
        .format(DISPLAY_TIME_FORMAT)
        .to_string()
}

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Works on character boundaries so multi-byte UTF-8 (emoji, CJK) never panics.
/// The Discord adapter uses it to keep embeds within the API limits.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// Render a list of names the way every listing command shows them.
pub fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn truncate_ascii_no_truncation() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello", 5), "hello");
    }

    #[test]
    fn truncate_ascii_with_truncation() {
        assert_eq!(truncate_with_ellipsis("hello world", 5), "hello...");
        assert_eq!(
            truncate_with_ellipsis("This is a long message", 10),
            "This is a..."
        );
    }

    #[test]
    fn truncate_emoji_on_char_boundary() {
        let s = "😀😀😀😀";
        assert_eq!(truncate_with_ellipsis(s, 2), "😀😀...");
        assert_eq!(truncate_with_ellipsis("Hello 🦀 World", 8), "Hello 🦀...");
    }

    #[test]
    fn ph_time_is_utc_plus_eight() {
        let at = Utc.with_ymd_and_hms(2024, 1, 31, 20, 15, 0).unwrap();
        assert_eq!(format_ph_time(at), "2024-02-01 04:15:00");
    }

    #[test]
    fn join_or_none_handles_empty() {
        assert_eq!(join_or_none(&[]), "None");
        assert_eq!(
            join_or_none(&["Staff".to_string(), "Admin".to_string()]),
            "Staff, Admin"
        );
    }
}
