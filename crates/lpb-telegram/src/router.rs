use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, error_handlers::LoggingErrorHandler, prelude::*};
use tracing::{info, warn};

use lpb_core::{
    config::Config, handler::PrintRelay, messaging::port::MessagingPort, print::PrintClient,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub relay: PrintRelay,
    pub messenger: Arc<dyn MessagingPort>,
}

pub async fn run_polling(cfg: Arc<Config>, printer: Arc<dyn PrintClient>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "bot started"),
        Err(e) => warn!(error = %e, "getMe failed; continuing with polling"),
    }

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState {
        relay: PrintRelay::new(cfg, printer),
        messenger,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    info!("starting bot polling");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .error_handler(LoggingErrorHandler::with_custom_text(
            "error while handling an update",
        ))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("bot polling stopped");
    Ok(())
}
