//! Physics collaborators consumed by the scheduler.
//!
//! Each capability is a small trait with a `get_event`/`run_event` contract.
//! Collaborators only ever see the particle array and the dynamics they are
//! handed; the scheduler owns all queue and cell bookkeeping.

pub mod capture;
pub mod interaction;
pub mod local;
pub mod plugin;
pub mod system;

pub use capture::CaptureMap;
pub use interaction::{HardSphere, Interaction, SquareWell};
pub use local::{Local, Wall};
pub use plugin::{EventCounter, EventData, EventLog, OutputPlugin};
pub use system::{AndersenThermostat, System, SystemOutcome, Ticker, VelocityRescaler};

use crate::core::dilated::MortonKey;
use crate::core::dynamics::Dynamics;
use crate::core::{Event, EventType, Particle};
use crate::error::Result;
use std::fmt;

/// Result of running a global event.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalOutcome {
    pub particle: usize,
    pub kind: EventType,
    pub from: MortonKey,
    pub to: MortonKey,
    /// Particles that became neighbours of `particle` and need pair events.
    pub new_neighbours: Vec<usize>,
}

/// Single-particle events that are not tied to a fixed geometry (the cell
/// neighbour list is one).
pub trait Global: fmt::Debug {
    fn name(&self) -> &str;

    fn is_interaction(&self, _p: &Particle) -> bool {
        true
    }

    /// Next event for `p`; `p` may be stale.
    fn get_event(&self, p: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event>;

    /// Execute the event for `particles[part]` without advancing the system clock.
    fn run_event(
        &mut self,
        particles: &mut [Particle],
        part: usize,
        dynamics: &Dynamics,
    ) -> Result<GlobalOutcome>;
}
