//! Single-particle events with fixed geometry.

use crate::core::dynamics::{dot, plane_root, Dynamics, ParticleEventData};
use crate::core::particle::DIM;
use crate::core::{Event, EventSource, EventType, Particle};
use crate::error::{Error, Result};
use std::fmt;

/// Fixed-geometry event source (walls and similar). The particle handed to
/// both methods is up to date.
pub trait Local: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn is_interaction(&self, _p: &Particle) -> bool {
        true
    }

    fn get_event(&self, p: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event>;

    fn run_event(
        &mut self,
        p: &mut Particle,
        event: &Event,
        dynamics: &Dynamics,
    ) -> Result<ParticleEventData>;
}

/// Infinite plane wall through `origin` with unit `normal` pointing into the
/// allowed region. Particles of diameter `diameter` reflect off it.
#[derive(Debug, Clone)]
pub struct Wall {
    origin: [f64; DIM],
    normal: [f64; DIM],
    diameter: f64,
    elasticity: f64,
}

impl Wall {
    pub fn new(origin: [f64; DIM], normal: [f64; DIM], diameter: f64, elasticity: f64) -> Result<Self> {
        let norm = dot(&normal, &normal).sqrt();
        if !(norm.is_finite() && norm > 0.0) {
            return Err(Error::InvalidParam("wall normal must be non-zero and finite".into()));
        }
        if !origin.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("wall origin must be finite".into()));
        }
        if !(diameter.is_finite() && diameter >= 0.0) {
            return Err(Error::InvalidParam("wall diameter must be finite and >= 0".into()));
        }
        if !(0.0..=1.0).contains(&elasticity) {
            return Err(Error::InvalidParam("elasticity must lie in [0, 1]".into()));
        }
        Ok(Self {
            origin,
            normal: normal.map(|x| x / norm),
            diameter,
            elasticity,
        })
    }

    pub fn normal(&self) -> [f64; DIM] {
        self.normal
    }
}

impl Local for Wall {
    fn name(&self) -> &str {
        "Wall"
    }

    fn get_event(&self, p: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event> {
        let r = dynamics.bc().separation(&p.r, &self.origin);
        // The contact point is half a diameter from the wall.
        let dt = plane_root(&r, &p.v, &self.normal, 0.5 * self.diameter);
        let source = EventSource::Local { id };
        if dt.is_infinite() {
            return Ok(Event::none(p.id, source));
        }
        Event::new(dt, p.id, source, EventType::Wall)
    }

    fn run_event(
        &mut self,
        p: &mut Particle,
        event: &Event,
        dynamics: &Dynamics,
    ) -> Result<ParticleEventData> {
        if event.kind != EventType::Wall {
            return Err(Error::Invariant(format!("wall cannot run a {:?} event", event.kind)));
        }
        Ok(dynamics.wall_collision(p, &self.normal, self.elasticity))
    }
}
