//! # BotClaw Core
//!
//! Shared building blocks for the BotClaw decision-and-dispatch pipeline:
//! the error type, configuration, the bot/campaign/decision data model and
//! the store interfaces the pipeline is wired through.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::BotClawConfig;
pub use error::{BotClawError, Result};
