//! Event-driven molecular dynamics.
//!
//! Particles move ballistically between discrete events (collisions, well
//! crossings, wall bounces, cell transitions). The [`scheduler::Scheduler`]
//! finds the next event with a Morton-ordered cell grid and a calendar-queue
//! future event list, and invalidates superseded events lazily through
//! per-particle generation counters.

pub mod cells;
pub mod config;
pub mod core;
pub mod error;
pub mod physics;
pub mod scheduler;
pub mod sentinel;
pub mod sorter;

#[cfg(feature = "python")]
mod python;

pub use crate::config::{SchedulerConfig, SchedulerKind, SorterKind};
pub use crate::core::{SimContext, Simulation};
pub use crate::error::{Error, Result};
pub use crate::scheduler::{EventOutcome, Scheduler};
