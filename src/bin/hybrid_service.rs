//! Hybrid service: peer call and publish per request

use anyhow::Context;
use interconnect::bootstrap;
use interconnect::config::ServiceKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_process();

    bootstrap::run_http_service(ServiceKind::Hybrid)
        .await
        .context("hybrid-service failed")
}
