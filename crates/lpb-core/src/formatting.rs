/// Telegram caps message text at 4096 characters.
pub const TELEGRAM_SAFE_LIMIT: usize = 4000;

/// Escape text for Telegram's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// HTML mention that links to the user's profile.
pub fn user_mention_html(user_id: i64, name: &str) -> String {
    format!(
        r#"<a href="tg://user?id={user_id}">{}</a>"#,
        escape_html(name)
    )
}

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s
        .chars()
        .take(max_chars.saturating_sub(3))
        .collect::<String>();
    out.push_str("...");
    out
}
