use std::sync::Arc;

use tracing::error;

use lpb_core::{config::Config, print::PrintClient};
use lpb_cups::LpClient;

#[tokio::main]
async fn main() -> Result<(), lpb_core::Error> {
    lpb_core::logging::init("lpb")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!(error = %e, "invalid configuration; exiting");
            return Err(e);
        }
    };
    cfg.log_summary();

    let printer: Arc<dyn PrintClient> = Arc::new(LpClient::new(cfg.print.clone()));

    lpb_telegram::router::run_polling(cfg, printer)
        .await
        .map_err(|e| lpb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
