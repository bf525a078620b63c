//! Periodic-image sentinel for the cell grid.
//!
//! Cell transitions run without moving the system clock, so a particle's cell
//! can run ahead of its stored position. Once that lead passes half a box the
//! nearest image of the cell is the wrong one. The sentinel caps the lead by
//! forcing a full update of each particle before it can drift that far.

use crate::core::dynamics::Dynamics;
use crate::core::particle::DIM;
use crate::core::{Event, EventSource, EventType, Particle};
use crate::error::{Error, Result};

/// Source id the sentinel stamps on its events.
pub const SENTINEL_GLOBAL_ID: usize = 1;

/// Share of the free length `L - cell_dimension` a particle may cover
/// between two full updates. Anything below one half keeps the cell centre
/// within half a box of the stored position.
const DRIFT_FRACTION: f64 = 0.45;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PbcSentinel {
    reach: [f64; DIM],
}

impl PbcSentinel {
    pub fn new(box_size: [f64; DIM], cell_dimension: [f64; DIM]) -> Result<Self> {
        let reach: [f64; DIM] = std::array::from_fn(|axis| DRIFT_FRACTION * (box_size[axis] - cell_dimension[axis]));
        if let Some(axis) = reach.iter().position(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(Error::Invariant(format!(
                "cells of width {} leave no room to drift in a box of {} on axis {axis}",
                cell_dimension[axis], box_size[axis]
            )));
        }
        Ok(Self { reach })
    }

    /// Distance per axis a particle may travel between full updates.
    pub fn reach(&self) -> [f64; DIM] {
        self.reach
    }

    /// Time for velocity `v` to use up the reach on its fastest axis.
    pub fn horizon(&self, v: &[f64; DIM]) -> f64 {
        (0..DIM)
            .filter(|&axis| v[axis] != 0.0)
            .map(|axis| self.reach[axis] / v[axis].abs())
            .fold(f64::INFINITY, f64::min)
    }

    /// Next forced update of `p`, or NONE for a particle at rest.
    pub fn get_event(&self, p: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event> {
        let source = EventSource::Global { id };
        let horizon = self.horizon(&p.v);
        if horizon.is_infinite() {
            return Ok(Event::none(p.id, source));
        }
        Event::new(horizon - dynamics.particle_delay(p), p.id, source, EventType::Virtual)
    }
}
