// Core modules
pub mod broker;
pub mod config;
pub mod features;
pub mod feed;
pub mod indicators;
pub mod model;
pub mod models;
pub mod persistence;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::BotConfig;
pub use models::*;
pub use strategy::StrategyCore;

use thiserror::Error;

/// Crate error taxonomy. Most orchestration paths use `anyhow` and wrap
/// one of these when the category matters to the caller.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("feed is not alive: {0}")]
    FeedDead(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, BotError>;
