//! The trading robot: execution plan, range construction, the
//! per-stream state machine, and the engine that runs them.

pub mod breakeven;
pub mod engine;
pub mod hydration;
pub mod plan;
pub mod range;
pub mod stream;

pub use engine::RobotEngine;
pub use hydration::{BarSource, HydrationPool, UnavailableBarSource};
pub use plan::{ExecutionPlan, PlanEntry};
pub use stream::{StandDownReason, Stream, StreamState};
