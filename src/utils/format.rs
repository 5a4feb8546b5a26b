use chrono::{DateTime, Utc};

/// Escape text for Telegram HTML parse mode
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Format an RFC 3339 timestamp (Cloudflare's `modified_on`) for display.
/// Returns "Unknown" for anything unparsable.
pub fn format_api_date(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc).format("%b %e, %Y %H:%M UTC").to_string(),
        Err(_) => "Unknown".to_string(),
    }
}

/// Today's date as an ISO `YYYY-MM-DD` string (compatibility_date format).
pub fn today_iso_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}
