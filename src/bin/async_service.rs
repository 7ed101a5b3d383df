//! Fire-and-forget publisher service

use anyhow::Context;
use interconnect::bootstrap;
use interconnect::config::ServiceKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_process();

    bootstrap::run_http_service(ServiceKind::Async)
        .await
        .context("async-service failed")
}
