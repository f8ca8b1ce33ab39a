//! Per-update state machine.
//!
//! `received -> authorizing -> (denied | validating-input) ->
//! (rejected | normalizing) -> (normalize-failed | dispatching) ->
//! (dispatch-failed | dispatch-succeeded)`
//!
//! Every transition after `received` sends exactly one reply. Nothing is kept
//! between updates; the only shared state is the read-only [`Config`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    copies::{copies_phrase, parse_copies},
    domain::{ChatId, Sender},
    errors::Error,
    formatting::{truncate_text, user_mention_html, TELEGRAM_SAFE_LIMIT},
    messaging::{
        port::MessagingPort,
        types::{Command, ImageMessage, IncomingUpdate, OtherMessage},
    },
    normalizer::{normalize, NormalizedImage, LABEL_HEIGHT_INCHES, LABEL_WIDTH_INCHES},
    print::{PrintClient, PrintJob},
    security::is_authorized,
    Result,
};

pub const UNAUTHORIZED_REPLY: &str = "Sorry, you are not authorized to use this bot.";
pub const NOT_AN_IMAGE_REPLY: &str = "Please send an image file.";
pub const NOT_CONFIGURED_REPLY: &str =
    "Printer is not configured. Please contact the administrator.";
pub const DOWNLOAD_FAILED_REPLY: &str = "Failed to download the image.";
pub const PROCESS_FAILED_REPLY: &str = "Failed to process the image.";

/// Terminal state reached for one update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Welcomed,
    Helped,
    StatusShown,
    Denied,
    Rejected,
    NotConfigured,
    DownloadFailed,
    NormalizeFailed,
    DispatchFailed,
    Printed,
}

/// Authorization gate, normalizer and dispatcher wired together.
#[derive(Clone)]
pub struct PrintRelay {
    cfg: Arc<Config>,
    printer: Arc<dyn PrintClient>,
}

impl PrintRelay {
    pub fn new(cfg: Arc<Config>, printer: Arc<dyn PrintClient>) -> Self {
        Self { cfg, printer }
    }

    /// Run one update through the state machine.
    pub async fn handle(&self, update: &IncomingUpdate, messenger: &dyn MessagingPort) -> Outcome {
        let chat_id = update.chat_id();
        let sender = update.sender();

        if let Err(e) = self.authorize(sender) {
            warn!(
                user_id = sender.map(|s| s.id.0),
                username = sender.map(Sender::log_name),
                error = %e,
                "unauthorized access attempt"
            );
            reply(messenger, chat_id, UNAUTHORIZED_REPLY).await;
            return Outcome::Denied;
        }

        match update {
            IncomingUpdate::Command(cmd) => self.handle_command(cmd, messenger).await,
            IncomingUpdate::Image(msg) => self.handle_image(msg, messenger).await,
            IncomingUpdate::Other(msg) => {
                info!(error = %reject_reason(msg), "ignoring non-image message");
                reply(messenger, chat_id, NOT_AN_IMAGE_REPLY).await;
                Outcome::Rejected
            }
        }
    }

    /// Allow-list check; updates without a sender are never authorized.
    pub fn authorize(&self, sender: Option<&Sender>) -> Result<()> {
        if is_authorized(sender.map(|s| s.id), &self.cfg.allowed_users) {
            Ok(())
        } else {
            Err(Error::Unauthorized(sender.map(|s| s.id.0)))
        }
    }

    async fn handle_command(&self, cmd: &Command, messenger: &dyn MessagingPort) -> Outcome {
        debug!(command = %cmd.name, args = %cmd.args, "handling command");
        match cmd.name.as_str() {
            "start" => {
                let mention = match &cmd.sender {
                    Some(s) => user_mention_html(s.id.0, &s.first_name),
                    None => "there".to_string(),
                };
                let html = format!("Hi {mention}! Send me an image to print on the label printer.");
                if let Err(e) = messenger.send_html(cmd.chat_id, &html).await {
                    warn!(error = %e, "failed to send welcome message");
                }
                Outcome::Welcomed
            }
            "help" => {
                reply(messenger, cmd.chat_id, &help_text()).await;
                Outcome::Helped
            }
            "status" => {
                reply(messenger, cmd.chat_id, &self.status_text()).await;
                Outcome::StatusShown
            }
            other => {
                let text = format!("Unknown command /{other}.\n\n{}", help_text());
                reply(messenger, cmd.chat_id, &text).await;
                Outcome::Helped
            }
        }
    }

    async fn handle_image(&self, msg: &ImageMessage, messenger: &dyn MessagingPort) -> Outcome {
        let chat_id = msg.chat_id;
        let user_id = msg.sender.as_ref().map(|s| s.id.0);

        let Some(printer) = self.cfg.printer_name.as_deref() else {
            error!("CUPS_PRINTER_NAME is not set; refusing print request");
            reply(messenger, chat_id, NOT_CONFIGURED_REPLY).await;
            return Outcome::NotConfigured;
        };

        info!(user_id, kind = ?msg.kind, "received image");

        let bytes = match messenger.download_file(&msg.file_id).await {
            Ok(b) => b,
            Err(e) => {
                error!(user_id, error = %e, "failed to download image");
                reply(messenger, chat_id, DOWNLOAD_FAILED_REPLY).await;
                return Outcome::DownloadFailed;
            }
        };

        let copies = parse_copies(msg.caption.as_deref());
        reply(
            messenger,
            chat_id,
            &format!(
                "Received image. Resizing and preparing to print {}...",
                copies_phrase(copies)
            ),
        )
        .await;

        let image = match normalize_off_thread(bytes).await {
            Ok(img) => img,
            Err(e) => {
                error!(user_id, error = %e, "error resizing image");
                reply(messenger, chat_id, PROCESS_FAILED_REPLY).await;
                return Outcome::NormalizeFailed;
            }
        };

        let job = PrintJob {
            printer,
            copies,
            image: &image,
        };
        match self.printer.print(job).await {
            Ok(receipt) => {
                info!(printer, user_id, copies, "sent image to printer");
                let text = format!("Sent to printer! CUPS message: {}", receipt.stdout.trim());
                reply(messenger, chat_id, &text).await;
                Outcome::Printed
            }
            Err(e) => {
                let diagnostic = e.diagnostic();
                error!(printer, user_id, error = %e, "failed to print image");
                let text = format!("Failed to send to printer. Error: {diagnostic}");
                reply(messenger, chat_id, &text).await;
                Outcome::DispatchFailed
            }
        }
    }

    fn status_text(&self) -> String {
        let cfg = &self.cfg;
        let printer = cfg.printer_name.as_deref().unwrap_or("not configured");
        let server = cfg.print.server_host.as_deref().unwrap_or("local");
        let access = if cfg.is_open_access() {
            "open to everyone".to_string()
        } else {
            format!("{} allowed user(s)", cfg.allowed_users.len())
        };
        format!(
            "Printer: {printer}\nCUPS server: {server}\nAccess: {access}\nPrint options: {}\nTimeout: {}s",
            cfg.print.options.join(", "),
            cfg.print.timeout.as_secs()
        )
    }
}

fn reject_reason(msg: &OtherMessage) -> Error {
    Error::InvalidInput(format!("{} message is not an image", msg.description))
}

fn help_text() -> String {
    format!(
        "Send a photo (or an image file) and it will be printed on a \
         {LABEL_WIDTH_INCHES}x{LABEL_HEIGHT_INCHES} inch label.\n\n\
         Add a caption like \"x3\" or \"copies=3\" to print several copies.\n\n\
         /status shows the printer settings."
    )
}

async fn normalize_off_thread(bytes: Vec<u8>) -> Result<NormalizedImage> {
    tokio::task::spawn_blocking(move || normalize(&bytes))
        .await
        .map_err(|e| Error::External(format!("image worker failed: {e}")))?
}

/// Send a reply; a failed send is logged and never aborts the update.
async fn reply(messenger: &dyn MessagingPort, chat_id: ChatId, text: &str) {
    let text = truncate_text(text, TELEGRAM_SAFE_LIMIT);
    if let Err(e) = messenger.send_text(chat_id, &text).await {
        warn!(chat_id = chat_id.0, error = %e, "failed to send reply");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        io::Cursor,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
    };

    use async_trait::async_trait;
    use image::{DynamicImage, ImageFormat};

    use super::*;
    use crate::{
        domain::UserId,
        messaging::types::ImageKind,
        normalizer::ImageFormatTag,
        print::PrintReceipt,
    };

    const CHAT: ChatId = ChatId(555);

    #[derive(Default)]
    struct FakeMessenger {
        sends: Mutex<Vec<String>>,
        html: Mutex<Vec<String>>,
        downloads: AtomicUsize,
        file: Option<Vec<u8>>,
        fail_sends: bool,
    }

    impl FakeMessenger {
        fn with_file(bytes: Vec<u8>) -> Self {
            Self {
                file: Some(bytes),
                ..Default::default()
            }
        }

        fn sent(&self) -> Vec<String> {
            self.sends.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn send_text(&self, _chat_id: ChatId, text: &str) -> Result<()> {
            if self.fail_sends {
                return Err(Error::External("telegram down".to_string()));
            }
            self.sends.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn send_html(&self, _chat_id: ChatId, html: &str) -> Result<()> {
            self.html.lock().unwrap().push(html.to_string());
            Ok(())
        }

        async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            self.file
                .clone()
                .ok_or_else(|| Error::External("file is gone".to_string()))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct PrintCall {
        printer: String,
        copies: u32,
        format: ImageFormatTag,
        size: (u32, u32),
    }

    struct FakePrinter {
        calls: Mutex<Vec<PrintCall>>,
        result: Box<dyn Fn() -> Result<PrintReceipt> + Send + Sync>,
    }

    impl FakePrinter {
        fn new(result: impl Fn() -> Result<PrintReceipt> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                result: Box::new(result),
            })
        }

        fn ok(stdout: &str) -> Arc<Self> {
            let stdout = stdout.to_string();
            Self::new(move || {
                Ok(PrintReceipt {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                })
            })
        }

        fn calls(&self) -> Vec<PrintCall> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PrintClient for FakePrinter {
        async fn print(&self, job: PrintJob<'_>) -> Result<PrintReceipt> {
            self.calls.lock().unwrap().push(PrintCall {
                printer: job.printer.to_string(),
                copies: job.copies,
                format: job.image.format,
                size: (job.image.width, job.image.height),
            });
            (self.result)()
        }
    }

    fn config(pairs: &[(&str, &str)]) -> Arc<Config> {
        let mut map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.entry("TELEGRAM_BOT_TOKEN".to_string())
            .or_insert_with(|| "123:abc".to_string());
        Arc::new(Config::from_lookup(|key| map.get(key).cloned()).unwrap())
    }

    fn sender(id: i64) -> Option<Sender> {
        Some(Sender {
            id: UserId(id),
            username: Some("alice".to_string()),
            first_name: "Alice".to_string(),
        })
    }

    fn command(id: i64, name: &str) -> IncomingUpdate {
        IncomingUpdate::Command(Command {
            chat_id: CHAT,
            sender: sender(id),
            name: name.to_string(),
            args: String::new(),
        })
    }

    fn image_update(id: i64, caption: Option<&str>) -> IncomingUpdate {
        IncomingUpdate::Image(ImageMessage {
            chat_id: CHAT,
            sender: sender(id),
            file_id: "file-1".to_string(),
            caption: caption.map(|s| s.to_string()),
            kind: ImageKind::Photo,
        })
    }

    fn png(img: DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[tokio::test]
    async fn start_welcomes_with_mention_in_open_mode() {
        let relay = PrintRelay::new(config(&[]), FakePrinter::ok(""));
        let messenger = FakeMessenger::default();

        let outcome = relay.handle(&command(7, "start"), &messenger).await;

        assert_eq!(outcome, Outcome::Welcomed);
        let html = messenger.html.lock().unwrap().clone();
        assert_eq!(
            html,
            vec![r#"Hi <a href="tg://user?id=7">Alice</a>! Send me an image to print on the label printer."#]
        );
    }

    #[tokio::test]
    async fn allow_list_denies_start_and_images() {
        let printer = FakePrinter::ok("request id is Label-1");
        let relay = PrintRelay::new(
            config(&[("ALLOWED_USER_IDS", "1,2"), ("CUPS_PRINTER_NAME", "Label")]),
            printer.clone(),
        );
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgb8(10, 10)));

        assert_eq!(
            relay.handle(&command(3, "start"), &messenger).await,
            Outcome::Denied
        );
        assert_eq!(
            relay.handle(&image_update(3, None), &messenger).await,
            Outcome::Denied
        );

        assert_eq!(messenger.sent(), vec![UNAUTHORIZED_REPLY, UNAUTHORIZED_REPLY]);
        assert!(messenger.html.lock().unwrap().is_empty());
        assert_eq!(messenger.downloads.load(Ordering::SeqCst), 0);
        assert!(printer.calls().is_empty());
    }

    #[tokio::test]
    async fn allow_list_admits_members() {
        let relay = PrintRelay::new(
            config(&[("ALLOWED_USER_IDS", "1,2"), ("CUPS_PRINTER_NAME", "Label")]),
            FakePrinter::ok("request id is Label-1"),
        );
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgb8(10, 10)));

        assert_eq!(
            relay.handle(&command(2, "start"), &messenger).await,
            Outcome::Welcomed
        );
        assert_eq!(
            relay.handle(&image_update(1, None), &messenger).await,
            Outcome::Printed
        );
    }

    #[tokio::test]
    async fn updates_without_a_sender_are_denied() {
        let relay = PrintRelay::new(config(&[]), FakePrinter::ok(""));
        let messenger = FakeMessenger::default();
        let update = IncomingUpdate::Other(OtherMessage {
            chat_id: CHAT,
            sender: None,
            description: "channel post",
        });

        assert_eq!(relay.handle(&update, &messenger).await, Outcome::Denied);
    }

    #[tokio::test]
    async fn non_image_messages_are_rejected() {
        let relay = PrintRelay::new(config(&[]), FakePrinter::ok(""));
        let messenger = FakeMessenger::default();
        let update = IncomingUpdate::Other(OtherMessage {
            chat_id: CHAT,
            sender: sender(1),
            description: "text",
        });

        assert_eq!(relay.handle(&update, &messenger).await, Outcome::Rejected);
        assert_eq!(messenger.sent(), vec![NOT_AN_IMAGE_REPLY]);
    }

    #[tokio::test]
    async fn missing_printer_never_dispatches() {
        let printer = FakePrinter::ok("unused");
        let relay = PrintRelay::new(config(&[]), printer.clone());
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgb8(10, 10)));

        let outcome = relay.handle(&image_update(1, Some("x2")), &messenger).await;

        assert_eq!(outcome, Outcome::NotConfigured);
        assert_eq!(messenger.sent(), vec![NOT_CONFIGURED_REPLY]);
        assert_eq!(messenger.downloads.load(Ordering::SeqCst), 0);
        assert!(printer.calls().is_empty());
    }

    #[tokio::test]
    async fn prints_normalized_image_with_caption_copies() {
        let printer = FakePrinter::ok("request id is Label-7 (1 file(s))\n");
        let relay = PrintRelay::new(config(&[("CUPS_PRINTER_NAME", "Label")]), printer.clone());
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgb8(2400, 600)));

        let outcome = relay
            .handle(&image_update(1, Some("copies=3")), &messenger)
            .await;

        assert_eq!(outcome, Outcome::Printed);
        assert_eq!(
            messenger.sent(),
            vec![
                "Received image. Resizing and preparing to print 3 copies...",
                "Sent to printer! CUPS message: request id is Label-7 (1 file(s))",
            ]
        );
        assert_eq!(
            printer.calls(),
            vec![PrintCall {
                printer: "Label".to_string(),
                copies: 3,
                format: ImageFormatTag::Jpeg,
                size: (1200, 300),
            }]
        );
    }

    #[tokio::test]
    async fn single_copy_wording() {
        let relay = PrintRelay::new(
            config(&[("CUPS_PRINTER_NAME", "Label")]),
            FakePrinter::ok("ok"),
        );
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgba8(20, 20)));

        relay.handle(&image_update(1, None), &messenger).await;

        assert_eq!(
            messenger.sent()[0],
            "Received image. Resizing and preparing to print 1 copy..."
        );
    }

    #[tokio::test]
    async fn print_failure_reports_stderr() {
        let printer = FakePrinter::new(|| {
            Err(Error::PrintFailed {
                status: Some(1),
                stdout: String::new(),
                stderr: "printer-not-found\n".to_string(),
            })
        });
        let relay = PrintRelay::new(config(&[("CUPS_PRINTER_NAME", "Nope")]), printer.clone());
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgb8(30, 30)));

        let outcome = relay.handle(&image_update(1, None), &messenger).await;

        assert_eq!(outcome, Outcome::DispatchFailed);
        assert_eq!(
            messenger.sent().last().map(String::as_str),
            Some("Failed to send to printer. Error: printer-not-found")
        );
        assert_eq!(printer.calls().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_image_is_reported() {
        let printer = FakePrinter::ok("unused");
        let relay = PrintRelay::new(config(&[("CUPS_PRINTER_NAME", "Label")]), printer.clone());
        let messenger = FakeMessenger::with_file(b"\x89PNG\r\n\x1a\ncorrupt".to_vec());

        let outcome = relay.handle(&image_update(1, None), &messenger).await;

        assert_eq!(outcome, Outcome::NormalizeFailed);
        assert_eq!(
            messenger.sent().last().map(String::as_str),
            Some(PROCESS_FAILED_REPLY)
        );
        assert!(printer.calls().is_empty());
    }

    #[tokio::test]
    async fn download_failure_is_reported() {
        let relay = PrintRelay::new(
            config(&[("CUPS_PRINTER_NAME", "Label")]),
            FakePrinter::ok("unused"),
        );
        let messenger = FakeMessenger::default();

        let outcome = relay.handle(&image_update(1, None), &messenger).await;

        assert_eq!(outcome, Outcome::DownloadFailed);
        assert_eq!(messenger.sent(), vec![DOWNLOAD_FAILED_REPLY]);
    }

    #[tokio::test]
    async fn failing_replies_do_not_abort_printing() {
        let printer = FakePrinter::ok("request id is Label-9");
        let relay = PrintRelay::new(config(&[("CUPS_PRINTER_NAME", "Label")]), printer.clone());
        let messenger = FakeMessenger {
            file: Some(png(DynamicImage::new_rgb8(10, 10))),
            fail_sends: true,
            ..Default::default()
        };

        let outcome = relay.handle(&image_update(1, None), &messenger).await;

        assert_eq!(outcome, Outcome::Printed);
        assert_eq!(printer.calls().len(), 1);
    }

    #[tokio::test]
    async fn help_status_and_unknown_commands() {
        let relay = PrintRelay::new(
            config(&[
                ("CUPS_PRINTER_NAME", "Label"),
                ("CUPS_SERVER_HOST", "cups.lan"),
                ("ALLOWED_USER_IDS", "1"),
            ]),
            FakePrinter::ok(""),
        );
        let messenger = FakeMessenger::default();

        assert_eq!(
            relay.handle(&command(1, "help"), &messenger).await,
            Outcome::Helped
        );
        assert_eq!(
            relay.handle(&command(1, "status"), &messenger).await,
            Outcome::StatusShown
        );
        assert_eq!(
            relay.handle(&command(1, "frobnicate"), &messenger).await,
            Outcome::Helped
        );

        let sent = messenger.sent();
        assert!(sent[0].contains("copies=3"));
        assert!(sent[1].contains("Printer: Label"));
        assert!(sent[1].contains("CUPS server: cups.lan"));
        assert!(sent[1].contains("1 allowed user(s)"));
        assert!(sent[2].starts_with("Unknown command /frobnicate."));
    }

    #[test]
    fn authorize_reports_the_denied_sender() {
        let relay = PrintRelay::new(config(&[("ALLOWED_USER_IDS", "1")]), FakePrinter::ok(""));

        assert!(relay.authorize(sender(1).as_ref()).is_ok());

        let err = relay.authorize(sender(3).as_ref()).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(Some(3))));
        assert_eq!(err.to_string(), "user 3 is not authorized");

        let err = relay.authorize(None).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(None)));
        assert_eq!(err.to_string(), "update without a sender is not authorized");
    }

    #[test]
    fn non_image_rejection_names_the_message_kind() {
        let err = reject_reason(&OtherMessage {
            chat_id: CHAT,
            sender: sender(1),
            description: "sticker",
        });
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "invalid input: sticker message is not an image");
    }

    #[tokio::test]
    async fn image_documents_print_like_photos() {
        let printer = FakePrinter::ok("request id is Label-9");
        let relay = PrintRelay::new(config(&[("CUPS_PRINTER_NAME", "Label")]), printer.clone());
        let messenger = FakeMessenger::with_file(png(DynamicImage::new_rgb8(10, 10)));
        let update = IncomingUpdate::Image(ImageMessage {
            chat_id: CHAT,
            sender: sender(1),
            file_id: "doc-1".to_string(),
            caption: Some("copies=2".to_string()),
            kind: ImageKind::Document,
        });

        assert_eq!(relay.handle(&update, &messenger).await, Outcome::Printed);
        assert_eq!(printer.calls()[0].copies, 2);
    }
}
