use async_trait::async_trait;

use crate::{domain::ChatId, Result};

/// Messenger port used by the handler.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<()>;
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()>;

    /// Fetch the bytes of a file attached to a message.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;
}
