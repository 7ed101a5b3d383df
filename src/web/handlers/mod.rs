//! Request handlers, one module per inbound trigger

pub mod health;
pub mod hybrid;
pub mod peer;
pub mod publish;
pub mod sync;
