//! Peer service answering synchronous calls

use anyhow::Context;
use interconnect::bootstrap;
use interconnect::config::ServiceKind;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    bootstrap::init_process();

    bootstrap::run_http_service(ServiceKind::Peer)
        .await
        .context("peer-service failed")
}
