//! Telegram update handlers.
//!
//! Turns a teloxide `Message` into a messenger-agnostic `IncomingUpdate` and
//! hands it to the core `PrintRelay`.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{Message, User},
};
use tracing::{debug, error};

use lpb_core::{
    domain::{ChatId, Sender, UserId},
    messaging::types::{
        parse_command, Command, ImageKind, ImageMessage, IncomingUpdate, OtherMessage,
    },
};

use crate::router::AppState;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff"];

pub async fn handle_message(_bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let update = classify(MessageView::from_message(&msg));
    let chat_id = update.chat_id();

    // Run on its own task so a panic in one update is logged instead of
    // taking the dispatcher down.
    let task = tokio::spawn(async move {
        state.relay.handle(&update, state.messenger.as_ref()).await
    });

    match task.await {
        Ok(outcome) => debug!(chat_id = chat_id.0, ?outcome, "update handled"),
        Err(e) => error!(chat_id = chat_id.0, error = %e, "update handler crashed"),
    }

    Ok(())
}

/// One size of a photo attachment.
#[derive(Clone, Copy, Debug)]
struct PhotoSizeView<'a> {
    file_id: &'a str,
    width: u32,
    height: u32,
}

#[derive(Clone, Copy, Debug)]
struct DocumentView<'a> {
    file_id: &'a str,
    mime: Option<&'a str>,
    file_name: Option<&'a str>,
}

/// The parts of a Telegram message the relay looks at.
#[derive(Clone, Debug)]
struct MessageView<'a> {
    chat_id: ChatId,
    sender: Option<Sender>,
    text: Option<&'a str>,
    caption: Option<&'a str>,
    photo: Vec<PhotoSizeView<'a>>,
    document: Option<DocumentView<'a>>,
    /// Label for anything that is neither text, photo nor document.
    other: &'static str,
}

impl<'a> MessageView<'a> {
    fn from_message(msg: &'a Message) -> Self {
        let photo = msg
            .photo()
            .unwrap_or_default()
            .iter()
            .map(|p| PhotoSizeView {
                file_id: &p.file.id,
                width: p.width,
                height: p.height,
            })
            .collect();

        let document = msg.document().map(|doc| DocumentView {
            file_id: &doc.file.id,
            mime: doc.mime_type.as_ref().map(|m| m.essence_str()),
            file_name: doc.file_name.as_deref(),
        });

        let other = if msg.sticker().is_some() {
            "sticker"
        } else if msg.video().is_some() || msg.animation().is_some() {
            "video"
        } else if msg.voice().is_some() || msg.audio().is_some() {
            "audio"
        } else {
            "message"
        };

        Self {
            chat_id: ChatId(msg.chat.id.0),
            sender: msg.from().map(to_sender),
            text: msg.text(),
            caption: msg.caption(),
            photo,
            document,
            other,
        }
    }
}

fn classify(view: MessageView<'_>) -> IncomingUpdate {
    let MessageView {
        chat_id,
        sender,
        text,
        caption,
        photo,
        document,
        other,
    } = view;
    let caption = caption.map(|s| s.to_string());

    if let Some(text) = text {
        if text.starts_with('/') {
            let (name, args) = parse_command(text);
            return IncomingUpdate::Command(Command {
                chat_id,
                sender,
                name,
                args,
            });
        }
        return IncomingUpdate::Other(OtherMessage {
            chat_id,
            sender,
            description: "text",
        });
    }

    if let Some(file_id) = largest_photo(&photo) {
        return IncomingUpdate::Image(ImageMessage {
            chat_id,
            sender,
            file_id: file_id.to_string(),
            caption,
            kind: ImageKind::Photo,
        });
    }

    if let Some(doc) = document {
        if is_image_document(doc.mime, doc.file_name) {
            return IncomingUpdate::Image(ImageMessage {
                chat_id,
                sender,
                file_id: doc.file_id.to_string(),
                caption,
                kind: ImageKind::Document,
            });
        }
        return IncomingUpdate::Other(OtherMessage {
            chat_id,
            sender,
            description: "document",
        });
    }

    IncomingUpdate::Other(OtherMessage {
        chat_id,
        sender,
        description: other,
    })
}

/// File id of the highest-resolution size. Telegram lists sizes smallest
/// first, so on equal area the later entry wins.
fn largest_photo<'a>(sizes: &[PhotoSizeView<'a>]) -> Option<&'a str> {
    sizes
        .iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
        .map(|p| p.file_id)
}

fn to_sender(user: &User) -> Sender {
    Sender {
        id: UserId(user.id.0 as i64),
        username: user.username.clone(),
        first_name: user.first_name.clone(),
    }
}

/// Documents count as images by MIME type, or by extension when Telegram
/// did not report one.
fn is_image_document(mime: Option<&str>, file_name: Option<&str>) -> bool {
    match mime {
        Some(m) if !m.is_empty() && m != "application/octet-stream" => {
            m.to_ascii_lowercase().starts_with("image/")
        }
        _ => file_name
            .and_then(|n| n.rsplit_once('.'))
            .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false),
    }
}
