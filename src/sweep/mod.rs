//! Retention enforcement.
//!
//! ```text
//! SweepScheduler ──► SweepCoordinator ──► ChannelSweeper ──► DeletionExecutor ──► ChannelGateway
//!                                               │
//!                                               └──► StatsReporter ──► PolicyStore
//! ```

mod coordinator;
mod executor;
mod scheduler;
mod stats;
mod sweeper;

pub use coordinator::{RunSummary, SweepCoordinator, SweepDeps, SweepJob};
pub use executor::{BackoffPolicy, BatchOutcome, DeleteStrategy, DeletionExecutor, FatalReason};
pub use scheduler::{SchedulerHandle, SweepScheduler, TickResult, spawn_scheduler};
pub use stats::StatsReporter;
pub use sweeper::{ChannelReport, ChannelSweeper, SweepOutcome, SweepRun};
