//! System events: scheduled actions not owned by any particle.

use crate::core::dynamics::Dynamics;
use crate::core::{EventType, Particle};
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};
use std::fmt;
use tracing::{debug, warn};

/// What a system event did to the particles.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemOutcome {
    pub kind: EventType,
    /// Particles whose velocities changed and need fresh events.
    pub changed: Vec<usize>,
    /// Every queued event time must be multiplied by this factor.
    pub time_rescale: Option<f64>,
    pub delta_ke: f64,
}

impl SystemOutcome {
    fn nothing(kind: EventType) -> Self {
        Self {
            kind,
            changed: Vec::new(),
            time_rescale: None,
            delta_ke: 0.0,
        }
    }
}

/// A system keeps its own countdown `dt` which the scheduler streams.
pub trait System: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> EventType;

    /// Time until this system next fires.
    fn dt(&self) -> f64;

    fn stream(&mut self, dt: f64);

    /// Fire and reset the countdown. Particles may be stale on entry.
    fn run_event(&mut self, particles: &mut [Particle], dynamics: &Dynamics) -> Result<SystemOutcome>;
}

fn check_period(period: f64) -> Result<()> {
    if !(period.is_finite() && period > 0.0) {
        return Err(Error::InvalidParam("period must be finite and > 0".into()));
    }
    Ok(())
}

/// Fires every `period`; does nothing to the particles.
#[derive(Debug, Clone)]
pub struct Ticker {
    period: f64,
    dt: f64,
}

impl Ticker {
    pub fn new(period: f64) -> Result<Self> {
        check_period(period)?;
        Ok(Self { period, dt: period })
    }
}

impl System for Ticker {
    fn name(&self) -> &str {
        "Ticker"
    }

    fn kind(&self) -> EventType {
        EventType::Ticker
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn stream(&mut self, dt: f64) {
        self.dt -= dt;
    }

    fn run_event(&mut self, _particles: &mut [Particle], _dynamics: &Dynamics) -> Result<SystemOutcome> {
        self.dt = self.period;
        Ok(SystemOutcome::nothing(EventType::Ticker))
    }
}

/// Rescales all velocities to temperature `target_kt` every `period`.
///
/// Free-flight event times scale exactly with 1/factor, so the queue is
/// rescaled instead of rebuilt.
#[derive(Debug, Clone)]
pub struct VelocityRescaler {
    period: f64,
    target_kt: f64,
    dt: f64,
}

impl VelocityRescaler {
    pub fn new(period: f64, target_kt: f64) -> Result<Self> {
        check_period(period)?;
        if !(target_kt.is_finite() && target_kt > 0.0) {
            return Err(Error::InvalidParam("target kT must be finite and > 0".into()));
        }
        Ok(Self {
            period,
            target_kt,
            dt: period,
        })
    }
}

impl System for VelocityRescaler {
    fn name(&self) -> &str {
        "VelocityRescaler"
    }

    fn kind(&self) -> EventType {
        EventType::Rescale
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn stream(&mut self, dt: f64) {
        self.dt -= dt;
    }

    fn run_event(&mut self, particles: &mut [Particle], dynamics: &Dynamics) -> Result<SystemOutcome> {
        self.dt = self.period;
        dynamics.update_all(particles);
        let ke: f64 = particles.iter().map(Particle::kinetic_energy).sum();
        let dof = 3.0 * particles.len() as f64;
        if ke <= 0.0 || dof == 0.0 {
            warn!("velocity rescale skipped: no kinetic energy");
            return Ok(SystemOutcome::nothing(EventType::Rescale));
        }
        let current_kt = 2.0 * ke / dof;
        let factor = (self.target_kt / current_kt).sqrt();
        for p in particles.iter_mut() {
            for v in &mut p.v {
                *v *= factor;
            }
        }
        debug!(current_kt, factor, "velocities rescaled");
        Ok(SystemOutcome {
            kind: EventType::Rescale,
            changed: Vec::new(),
            time_rescale: Some(1.0 / factor),
            delta_ke: ke * (factor * factor - 1.0),
        })
    }
}

/// Andersen thermostat: at exponentially distributed intervals of mean
/// `mean_free_time`, one random particle gets a Maxwell-Boltzmann velocity at
/// temperature `kt`.
#[derive(Debug, Clone)]
pub struct AndersenThermostat {
    interval: Exp<f64>,
    kt: f64,
    rng: StdRng,
    dt: f64,
}

impl AndersenThermostat {
    pub fn new(mean_free_time: f64, kt: f64, seed: u64) -> Result<Self> {
        check_period(mean_free_time)?;
        if !(kt.is_finite() && kt > 0.0) {
            return Err(Error::InvalidParam("kT must be finite and > 0".into()));
        }
        let interval = Exp::new(1.0 / mean_free_time)
            .map_err(|e| Error::InvalidParam(format!("thermostat interval: {e}")))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let dt = interval.sample(&mut rng);
        Ok(Self {
            interval,
            kt,
            rng,
            dt,
        })
    }
}

impl System for AndersenThermostat {
    fn name(&self) -> &str {
        "AndersenThermostat"
    }

    fn kind(&self) -> EventType {
        EventType::Thermostat
    }

    fn dt(&self) -> f64 {
        self.dt
    }

    fn stream(&mut self, dt: f64) {
        self.dt -= dt;
    }

    fn run_event(&mut self, particles: &mut [Particle], dynamics: &Dynamics) -> Result<SystemOutcome> {
        self.dt = self.interval.sample(&mut self.rng);
        if particles.is_empty() {
            return Ok(SystemOutcome::nothing(EventType::Thermostat));
        }
        let id = self.rng.random_range(0..particles.len());
        let p = &mut particles[id];
        dynamics.update_particle(p);
        let normal = Normal::new(0.0, (self.kt / p.mass).sqrt())
            .map_err(|e| Error::MathError(format!("thermostat velocity distribution: {e}")))?;
        let ke0 = p.kinetic_energy();
        for v in &mut p.v {
            *v = normal.sample(&mut self.rng);
        }
        Ok(SystemOutcome {
            kind: EventType::Thermostat,
            changed: vec![id],
            time_rescale: None,
            delta_ke: p.kinetic_energy() - ke0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::BoundaryCondition;
    use approx::assert_relative_eq;

    fn gas() -> Result<(Vec<Particle>, Dynamics)> {
        let particles = vec![
            Particle::new(0, [0.0; 3], [1.0, 0.0, 0.0], 1.0)?,
            Particle::new(1, [1.0; 3], [0.0, 2.0, 0.0], 2.0)?,
        ];
        Ok((particles, Dynamics::new(BoundaryCondition::periodic([10.0; 3])?, 1000)))
    }

    #[test]
    fn ticker_counts_down_and_resets() -> Result<()> {
        let (mut particles, dynamics) = gas()?;
        let mut t = Ticker::new(0.5)?;
        t.stream(0.2);
        assert_relative_eq!(t.dt(), 0.3);
        let out = t.run_event(&mut particles, &dynamics)?;
        assert!(out.changed.is_empty());
        assert_relative_eq!(t.dt(), 0.5);
        Ok(())
    }

    #[test]
    fn rescaler_hits_target_temperature() -> Result<()> {
        let (mut particles, dynamics) = gas()?;
        let mut r = VelocityRescaler::new(1.0, 2.0)?;
        let out = r.run_event(&mut particles, &dynamics)?;
        let ke: f64 = particles.iter().map(Particle::kinetic_energy).sum();
        assert_relative_eq!(2.0 * ke / 6.0, 2.0, epsilon = 1e-12);
        // KE was 4.5, target KE is 6: factor sqrt(4/3).
        let factor = (4.0f64 / 3.0).sqrt();
        assert_relative_eq!(out.time_rescale.unwrap_or(f64::NAN), 1.0 / factor, epsilon = 1e-12);
        assert_relative_eq!(out.delta_ke, 1.5, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn thermostat_is_reproducible() -> Result<()> {
        let (mut a, dynamics) = gas()?;
        let mut b = a.clone();
        let mut ta = AndersenThermostat::new(0.1, 1.0, 7)?;
        let mut tb = AndersenThermostat::new(0.1, 1.0, 7)?;
        assert_eq!(ta.dt(), tb.dt());
        assert!(ta.dt() > 0.0);
        let oa = ta.run_event(&mut a, &dynamics)?;
        let ob = tb.run_event(&mut b, &dynamics)?;
        assert_eq!(oa.changed, ob.changed);
        assert_eq!(oa.changed.len(), 1);
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn constructors_validate() {
        assert!(Ticker::new(0.0).is_err());
        assert!(VelocityRescaler::new(1.0, -1.0).is_err());
        assert!(AndersenThermostat::new(f64::INFINITY, 1.0, 0).is_err());
    }
}
