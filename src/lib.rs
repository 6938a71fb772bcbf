// Library crate - exports the session-breakout execution core

pub mod config;
pub mod events;
pub mod execution;
pub mod feed;
pub mod journal;
pub mod rate_limit;
pub mod registry;
pub mod robot;
pub mod time_service;
pub mod types;

// Re-export commonly used types
pub use config::RobotConfig;
pub use robot::{ExecutionPlan, RobotEngine};
pub use types::*;
