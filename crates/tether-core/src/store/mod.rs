//! Local persistence layer for Tether

mod connection;
mod local;
mod migrations;

pub use connection::Database;
pub use local::{LocalStore, META_LAST_SYNC_TIME};

pub(crate) use local::record_id;
