//! Messaging front-end adapters.

pub mod telegram;

pub use telegram::{TelegramChannel, TelegramConfig};
