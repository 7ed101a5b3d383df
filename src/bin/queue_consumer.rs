//! Queue consumer: logs every message on the configured queue
//!
//! Exits non-zero when the broker connection or the queue declaration fails.

use std::process::ExitCode;

use interconnect::bootstrap;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    bootstrap::init_process();

    match bootstrap::run_consumer_service().await {
        Ok(stats) => {
            info!(?stats, "Consumer shut down");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Consumer failed");
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(1))
        }
    }
}
