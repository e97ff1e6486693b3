//! Waygate — messaging gateway: conversation flows and blast campaigns.

pub mod blast;
pub mod channel;
pub mod config;
pub mod error;
pub mod flow;
pub mod quota;
pub mod store;
pub mod template;
