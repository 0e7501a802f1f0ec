//! SmsVault - durable SMS webhook ingestion and query service.
//!
//! This library backs the `smsvault-web` binary, which:
//! - Receives signed SMS webhooks and verifies their HMAC signatures
//! - Records each message exactly once, keyed on the provider's message id
//! - Serves paginated message search and aggregate statistics
//!
//! ## Architecture
//!
//! ```text
//! Webhooks → Web Server → SQLite messages table ← Query API
//! ```

pub mod config;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::Config;
pub use store::{
    InsertOutcome, ListFilter, ListPage, Message, MessageStats, NewMessage, SqliteMessageStore,
};
pub use web::AppState;
