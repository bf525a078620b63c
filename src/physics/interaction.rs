//! Pair interactions.

use super::capture::CaptureMap;
use crate::core::dynamics::{sphere_in_root, sphere_out_root, Dynamics, PairEventData};
use crate::core::{Event, EventSource, EventType, Particle};
use crate::error::{Error, Result};
use std::fmt;
use std::ops::Range;
use tracing::debug;

/// Pair potential consumed by the scheduler.
///
/// `get_event` and `run_event` require both particles to be up to date with
/// the system clock; the scheduler guarantees this before calling.
pub trait Interaction: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Largest separation at which this interaction can produce an event.
    fn max_int_dist(&self) -> f64;

    /// Whether this interaction governs the pair.
    fn applies_to(&self, _p1: &Particle, _p2: &Particle) -> bool {
        true
    }

    /// Rebuild any internal state from current positions.
    fn initialise(&mut self, _particles: &[Particle], _dynamics: &Dynamics) -> Result<()> {
        Ok(())
    }

    /// Next event of the pair, or a `None` event.
    fn get_event(&self, p1: &Particle, p2: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event>;

    /// Execute `event` on the pair it names.
    fn run_event(
        &mut self,
        particles: &mut [Particle],
        event: &Event,
        dynamics: &Dynamics,
    ) -> Result<PairEventData>;

    /// Potential energy stored in the interaction.
    fn internal_energy(&self) -> f64 {
        0.0
    }
}

fn pair_source(id: usize, partner: usize) -> EventSource {
    EventSource::Interaction {
        id,
        partner,
        partner_count: 0,
    }
}

fn partner_of(event: &Event) -> Result<usize> {
    event
        .partner()
        .ok_or_else(|| Error::Invariant(format!("pair interaction handed a non-pair event: {event}")))
}

fn in_range(range: &Option<Range<usize>>, p1: &Particle, p2: &Particle) -> bool {
    range
        .as_ref()
        .map_or(true, |r| r.contains(&p1.id) && r.contains(&p2.id))
}

/// Hard spheres of a single diameter with restitution `elasticity`.
#[derive(Debug, Clone)]
pub struct HardSphere {
    diameter: f64,
    elasticity: f64,
    range: Option<Range<usize>>,
}

impl HardSphere {
    pub fn new(diameter: f64, elasticity: f64) -> Result<Self> {
        if !(diameter.is_finite() && diameter > 0.0) {
            return Err(Error::InvalidParam("diameter must be finite and > 0".into()));
        }
        if !(0.0..=1.0).contains(&elasticity) {
            return Err(Error::InvalidParam("elasticity must lie in [0, 1]".into()));
        }
        Ok(Self {
            diameter,
            elasticity,
            range: None,
        })
    }

    /// Restrict the interaction to pairs with both ids in `range`.
    pub fn with_range(mut self, range: Range<usize>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn diameter(&self) -> f64 {
        self.diameter
    }
}

impl Interaction for HardSphere {
    fn name(&self) -> &str {
        "HardSphere"
    }

    fn max_int_dist(&self) -> f64 {
        self.diameter
    }

    fn applies_to(&self, p1: &Particle, p2: &Particle) -> bool {
        in_range(&self.range, p1, p2)
    }

    fn get_event(&self, p1: &Particle, p2: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event> {
        let (r, v) = dynamics.relative(p1, p2);
        let dt = sphere_in_root(&r, &v, self.diameter);
        if dt.is_infinite() {
            return Ok(Event::none(p1.id, pair_source(id, p2.id)));
        }
        Event::new(dt, p1.id, pair_source(id, p2.id), EventType::Core)
    }

    fn run_event(
        &mut self,
        particles: &mut [Particle],
        event: &Event,
        dynamics: &Dynamics,
    ) -> Result<PairEventData> {
        let partner = partner_of(event)?;
        match event.kind {
            EventType::Core => {
                dynamics.smooth_spheres_collision(particles, event.particle, partner, self.elasticity)
            }
            other => Err(Error::Invariant(format!("hard sphere cannot run a {other:?} event"))),
        }
    }
}

/// Square well: a hard core of `diameter` inside an attractive shell of
/// radius `lambda * diameter` and depth `well_depth`.
#[derive(Debug, Clone)]
pub struct SquareWell {
    diameter: f64,
    lambda: f64,
    well_depth: f64,
    elasticity: f64,
    range: Option<Range<usize>>,
    captures: CaptureMap,
}

impl SquareWell {
    pub fn new(diameter: f64, lambda: f64, well_depth: f64, elasticity: f64) -> Result<Self> {
        if !(diameter.is_finite() && diameter > 0.0) {
            return Err(Error::InvalidParam("diameter must be finite and > 0".into()));
        }
        if !(lambda.is_finite() && lambda > 1.0) {
            return Err(Error::InvalidParam("well lambda must be finite and > 1".into()));
        }
        if !well_depth.is_finite() {
            return Err(Error::InvalidParam("well depth must be finite".into()));
        }
        if !(0.0..=1.0).contains(&elasticity) {
            return Err(Error::InvalidParam("elasticity must lie in [0, 1]".into()));
        }
        Ok(Self {
            diameter,
            lambda,
            well_depth,
            elasticity,
            range: None,
            captures: CaptureMap::new(),
        })
    }

    pub fn with_range(mut self, range: Range<usize>) -> Self {
        self.range = Some(range);
        self
    }

    pub fn captures(&self) -> &CaptureMap {
        &self.captures
    }

    fn well_diameter(&self) -> f64 {
        self.lambda * self.diameter
    }
}

impl Interaction for SquareWell {
    fn name(&self) -> &str {
        "SquareWell"
    }

    fn max_int_dist(&self) -> f64 {
        self.well_diameter()
    }

    fn applies_to(&self, p1: &Particle, p2: &Particle) -> bool {
        in_range(&self.range, p1, p2)
    }

    /// Capture every pair currently inside the well. O(N^2).
    fn initialise(&mut self, particles: &[Particle], dynamics: &Dynamics) -> Result<()> {
        self.captures.clear();
        let wd2 = self.well_diameter().powi(2);
        for (i, p1) in particles.iter().enumerate() {
            for p2 in &particles[i + 1..] {
                if !self.applies_to(p1, p2) {
                    continue;
                }
                let r = dynamics.bc().separation(
                    &dynamics.current_position(p1),
                    &dynamics.current_position(p2),
                );
                let r2: f64 = r.iter().map(|x| x * x).sum();
                if r2 < wd2 {
                    self.captures.add(p1.id, p2.id);
                }
            }
        }
        debug!(captured = self.captures.len(), "square well captures rebuilt");
        Ok(())
    }

    fn get_event(&self, p1: &Particle, p2: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event> {
        let (r, v) = dynamics.relative(p1, p2);
        let source = pair_source(id, p2.id);
        if self.captures.is_captured(p1.id, p2.id) {
            let core = sphere_in_root(&r, &v, self.diameter);
            if core.is_finite() {
                return Event::new(core, p1.id, source, EventType::Core);
            }
            let out = sphere_out_root(&r, &v, self.well_diameter());
            if out.is_finite() {
                return Event::new(out, p1.id, source, EventType::WellOut);
            }
        } else {
            let dt = sphere_in_root(&r, &v, self.well_diameter());
            if dt.is_finite() {
                return Event::new(dt, p1.id, source, EventType::WellIn);
            }
        }
        Ok(Event::none(p1.id, source))
    }

    fn run_event(
        &mut self,
        particles: &mut [Particle],
        event: &Event,
        dynamics: &Dynamics,
    ) -> Result<PairEventData> {
        let (p1, p2) = (event.particle, partner_of(event)?);
        match event.kind {
            EventType::Core => dynamics.smooth_spheres_collision(particles, p1, p2, self.elasticity),
            EventType::WellIn => {
                let data =
                    dynamics.sphere_well_event(particles, p1, p2, self.well_depth, EventType::WellIn)?;
                if data.kind != EventType::Bounce {
                    self.captures.add(p1, p2);
                }
                Ok(data)
            }
            EventType::WellOut => {
                let data =
                    dynamics.sphere_well_event(particles, p1, p2, -self.well_depth, EventType::WellOut)?;
                if data.kind != EventType::Bounce {
                    self.captures.remove(p1, p2);
                }
                Ok(data)
            }
            other => Err(Error::Invariant(format!("square well cannot run a {other:?} event"))),
        }
    }

    fn internal_energy(&self) -> f64 {
        -self.well_depth * self.captures.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::BoundaryCondition;
    use approx::assert_relative_eq;

    fn dynamics() -> Result<Dynamics> {
        Ok(Dynamics::new(BoundaryCondition::periodic([20.0; 3])?, 1000))
    }

    fn pair(x: f64, vx: f64) -> Result<Vec<Particle>> {
        Ok(vec![
            Particle::new(0, [0.0; 3], [0.0; 3], 1.0)?,
            Particle::new(1, [x, 0.0, 0.0], [vx, 0.0, 0.0], 1.0)?,
        ])
    }

    #[test]
    fn hard_sphere_predicts_contact() -> Result<()> {
        let dynamics = dynamics()?;
        let particles = pair(3.0, -1.0)?;
        let hs = HardSphere::new(1.0, 1.0)?;
        let ev = hs.get_event(&particles[0], &particles[1], &dynamics, 0)?;
        assert_eq!(ev.kind, EventType::Core);
        assert_relative_eq!(ev.dt(), 2.0, epsilon = 1e-12);
        assert_eq!(ev.partner(), Some(1));

        let receding = pair(3.0, 1.0)?;
        let none = hs.get_event(&receding[0], &receding[1], &dynamics, 0)?;
        assert_eq!(none.kind, EventType::None);
        Ok(())
    }

    #[test]
    fn hard_sphere_rejects_foreign_event() -> Result<()> {
        let dynamics = dynamics()?;
        let mut particles = pair(1.0, -1.0)?;
        let mut hs = HardSphere::new(1.0, 1.0)?;
        let ev = Event::new(0.0, 0, pair_source(0, 1), EventType::WellIn)?;
        assert!(hs.run_event(&mut particles, &ev, &dynamics).is_err());
        Ok(())
    }

    #[test]
    fn square_well_cycle_tracks_captures() -> Result<()> {
        let dynamics = dynamics()?;
        let mut particles = pair(3.0, -1.0)?;
        let mut sw = SquareWell::new(1.0, 1.5, 1.0, 1.0)?;
        sw.initialise(&particles, &dynamics)?;
        assert!(sw.captures().is_empty());

        let ev = sw.get_event(&particles[0], &particles[1], &dynamics, 0)?;
        assert_eq!(ev.kind, EventType::WellIn);
        assert_relative_eq!(ev.dt(), 1.5, epsilon = 1e-12);

        particles[1].r[0] = 1.5;
        let data = sw.run_event(&mut particles, &ev, &dynamics)?;
        assert_eq!(data.kind, EventType::WellIn);
        assert_relative_eq!(data.delta_ke, 1.0, epsilon = 1e-12);
        assert!(sw.captures().is_captured(0, 1));
        assert_relative_eq!(sw.internal_energy(), -1.0);

        let next = sw.get_event(&particles[0], &particles[1], &dynamics, 0)?;
        assert_eq!(next.kind, EventType::Core);
        Ok(())
    }

    #[test]
    fn shallow_exit_keeps_pair_captured() -> Result<()> {
        let dynamics = dynamics()?;
        let mut particles = pair(1.5, 0.1)?;
        let mut sw = SquareWell::new(1.0, 1.5, 1.0, 1.0)?;
        particles[1].r[0] = 1.4;
        sw.initialise(&particles, &dynamics)?;
        assert!(sw.captures().is_captured(0, 1));

        // Receding pair: the next event is the well edge.
        let ev = sw.get_event(&particles[0], &particles[1], &dynamics, 0)?;
        assert_eq!(ev.kind, EventType::WellOut);

        particles[1].r[0] = 1.5;
        let data = sw.run_event(&mut particles, &ev, &dynamics)?;
        assert_eq!(data.kind, EventType::Bounce);
        assert!(sw.captures().is_captured(0, 1));
        // Relative velocity along the line of centres is reversed.
        assert_relative_eq!(particles[0].v[0] - particles[1].v[0], 0.1, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn range_limits_applicability() -> Result<()> {
        let particles = pair(3.0, -1.0)?;
        let hs = HardSphere::new(1.0, 1.0)?.with_range(1..4);
        assert!(!hs.applies_to(&particles[0], &particles[1]));
        Ok(())
    }

    #[test]
    fn constructors_validate() {
        assert!(HardSphere::new(0.0, 1.0).is_err());
        assert!(HardSphere::new(1.0, 1.5).is_err());
        assert!(SquareWell::new(1.0, 1.0, 1.0, 1.0).is_err());
        assert!(SquareWell::new(1.0, 1.5, f64::NAN, 1.0).is_err());
    }
}
