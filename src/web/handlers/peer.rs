//! Peer endpoint answering synchronous calls

/// Body returned to every synchronous caller
pub const PEER_GREETING: &str = "Hello from Service B (Sync)";

/// GET /data
pub async fn data() -> &'static str {
    PEER_GREETING
}
