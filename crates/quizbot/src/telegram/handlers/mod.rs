//! Telegram bot handler tree configuration
//!
//! The command logic lives in plain functions over [`HandlerDeps`] so it can
//! be tested without a Bot API connection.

pub mod commands;
mod schema;
mod types;

pub use schema::{broadcast_content, schema};
pub use types::{display_name, user_id, HandlerDeps, HandlerError};
