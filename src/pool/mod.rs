//! Bot pool: scheduling and credential lifecycle
//!
//! The scheduler exclusively owns the session map; the lifecycle worker
//! is the only other writer, and it goes through the scheduler's
//! methods.

pub mod lifecycle;
pub mod scheduler;

pub use lifecycle::{LifecycleCommand, LifecycleWorker};
pub use scheduler::{BotOp, BotPool, TurnOutcome};
