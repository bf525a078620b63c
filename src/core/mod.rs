//! Core simulation data structures: particles, events, boundary conditions,
//! ballistic dynamics, Morton cell keys and the top-level simulation.

pub mod boundary;
pub mod dilated;
pub mod dynamics;
pub mod event;
pub mod particle;
pub mod sim;

pub use boundary::BoundaryCondition;
pub use dilated::{DilatedInteger, MortonKey};
pub use dynamics::{Dynamics, PairEventData, ParticleEventData};
pub use event::{Event, EventSource, EventType};
pub use particle::{Particle, DIM};
pub use sim::{SimContext, Simulation};
