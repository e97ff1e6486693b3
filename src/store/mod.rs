//! Persistence layer.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::{ChannelAccount, ChatLogEntry, ChatState, Direction, QuotaAccount, Store};
