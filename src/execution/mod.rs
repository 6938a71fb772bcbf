//! Execution boundary: intents, the venue capability interface, and
//! the simulated venue used for paper trading and tests.

mod adapter;
mod intent;
mod sim;

pub use adapter::{
    AdapterCapabilities, AdapterError, AdapterEvent, ExecutionAdapter, OrderRef,
};
pub use intent::{Direction, ExitReason, Intent, IntentStatus, StopKind};
pub use sim::{SimAdapter, SimHandle};
