use crate::domain::{ChatId, Sender};

/// Messenger-agnostic incoming update.
///
/// Telegram-specific fields live in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Image(ImageMessage),
    Other(OtherMessage),
}

impl IncomingUpdate {
    pub fn chat_id(&self) -> ChatId {
        match self {
            IncomingUpdate::Command(c) => c.chat_id,
            IncomingUpdate::Image(m) => m.chat_id,
            IncomingUpdate::Other(m) => m.chat_id,
        }
    }

    pub fn sender(&self) -> Option<&Sender> {
        match self {
            IncomingUpdate::Command(c) => c.sender.as_ref(),
            IncomingUpdate::Image(m) => m.sender.as_ref(),
            IncomingUpdate::Other(m) => m.sender.as_ref(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub sender: Option<Sender>,
    /// Lowercase, without the leading `/` or `@botname`.
    pub name: String,
    pub args: String,
}

/// How the image arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    /// Compressed photo; the adapter picks the largest size.
    Photo,
    /// Image sent as a file (`image/*` document).
    Document,
}

#[derive(Clone, Debug)]
pub struct ImageMessage {
    pub chat_id: ChatId,
    pub sender: Option<Sender>,
    pub file_id: String,
    pub caption: Option<String>,
    pub kind: ImageKind,
}

/// Anything else: text, stickers, non-image documents.
#[derive(Clone, Debug)]
pub struct OtherMessage {
    pub chat_id: ChatId,
    pub sender: Option<Sender>,
    pub description: &'static str,
}

/// Parse `/cmd@botname arg1 ...` into `(cmd, args)`.
pub fn parse_command(text: &str) -> (String, String) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}
