use crate::config::SchedulerConfig;
use crate::core::boundary::BoundaryCondition;
use crate::core::dynamics::{dot, Dynamics};
use crate::core::particle::DIM;
use crate::core::{Event, EventSource, Particle};
use crate::error::{Error, Result};
use crate::physics::{HardSphere, Interaction, Local, OutputPlugin, System};
use crate::scheduler::{EventOutcome, Scheduler};
use rand::{rng, rngs::StdRng, Rng, SeedableRng};
use std::any::Any;
use tracing::info;

/// Small numeric tolerance for time checks.
const EPS_TIME: f64 = 1e-12;

/// Everything the scheduler and the physics collaborators share: particles,
/// dynamics, registered collaborators and the system clock.
#[derive(Debug)]
pub struct SimContext {
    pub particles: Vec<Particle>,
    pub dynamics: Dynamics,
    pub interactions: Vec<Box<dyn Interaction>>,
    pub locals: Vec<Box<dyn Local>>,
    pub systems: Vec<Box<dyn System>>,
    pub system_time: f64,
    /// Executed physical and system events.
    pub event_count: u64,
}

impl SimContext {
    /// Particle ids must equal their index.
    pub fn new(particles: Vec<Particle>, dynamics: Dynamics) -> Result<Self> {
        if let Some((i, p)) = particles.iter().enumerate().find(|(i, p)| p.id != *i) {
            return Err(Error::InvalidParam(format!(
                "particle at index {i} has id {}",
                p.id
            )));
        }
        Ok(Self {
            particles,
            dynamics,
            interactions: Vec::new(),
            locals: Vec::new(),
            systems: Vec::new(),
            system_time: 0.0,
            event_count: 0,
        })
    }

    pub fn with_interaction(mut self, interaction: impl Interaction + 'static) -> Self {
        self.interactions.push(Box::new(interaction));
        self
    }

    pub fn with_local(mut self, local: impl Local + 'static) -> Self {
        self.locals.push(Box::new(local));
        self
    }

    pub fn with_system(mut self, system: impl System + 'static) -> Self {
        self.systems.push(Box::new(system));
        self
    }

    /// Longest range over the registered interactions.
    pub fn max_interaction_distance(&self) -> f64 {
        self.interactions
            .iter()
            .map(|i| i.max_int_dist())
            .fold(0.0, f64::max)
    }

    /// Next event of an up-to-date pair from the first interaction governing it.
    pub fn interaction_event(&self, p1: usize, p2: usize) -> Result<Event> {
        let (a, b) = (&self.particles[p1], &self.particles[p2]);
        for (id, interaction) in self.interactions.iter().enumerate() {
            if interaction.applies_to(a, b) {
                return interaction.get_event(a, b, &self.dynamics, id);
            }
        }
        Ok(Event::none(
            p1,
            EventSource::Interaction {
                id: 0,
                partner: p2,
                partner_count: 0,
            },
        ))
    }

    /// Advance the clock by `dt`; particles stream lazily.
    pub fn stream(&mut self, dt: f64) {
        self.system_time += dt;
        self.dynamics.stream(dt, &mut self.particles);
        for system in &mut self.systems {
            system.stream(dt);
        }
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.particles.iter().map(|p| p.kinetic_energy()).sum()
    }

    /// Kinetic plus interaction energy.
    pub fn total_energy(&self) -> f64 {
        self.kinetic_energy()
            + self
                .interactions
                .iter()
                .map(|i| i.internal_energy())
                .sum::<f64>()
    }
}

/// Event-driven simulation: a context driven by a [`Scheduler`],
/// with output plugins notified after every executed event.
#[derive(Debug)]
pub struct Simulation {
    ctx: SimContext,
    scheduler: Scheduler,
    plugins: Vec<Box<dyn OutputPlugin>>,
    finished: bool,
}

impl Simulation {
    /// Build the scheduler for `ctx` and queue every initial event.
    pub fn new(mut ctx: SimContext, config: SchedulerConfig) -> Result<Self> {
        let mut scheduler = Scheduler::new(config)?;
        scheduler.initialise(&mut ctx)?;
        info!(
            particles = ctx.particles.len(),
            interactions = ctx.interactions.len(),
            locals = ctx.locals.len(),
            systems = ctx.systems.len(),
            scheduler = scheduler.config().scheduler.as_str(),
            sorter = scheduler.sorter().name(),
            "simulation ready"
        );
        Ok(Self {
            ctx,
            scheduler,
            plugins: Vec::new(),
            finished: false,
        })
    }

    /// `num_particles` elastic hard spheres at random non-overlapping
    /// positions in a periodic box centred on the origin.
    ///
    /// Initial velocities are sampled uniformly in [-1, 1] for each component.
    pub fn hard_sphere_gas(
        num_particles: usize,
        box_size: [f64; DIM],
        diameter: f64,
        mass: f64,
        seed: Option<u64>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        if num_particles == 0 {
            return Err(Error::InvalidParam("num_particles must be > 0".into()));
        }
        let bc = BoundaryCondition::periodic(box_size)?;
        let interaction = HardSphere::new(diameter, 1.0)?;
        if !mass.is_finite() || mass <= 0.0 {
            return Err(Error::InvalidParam("mass must be finite and > 0".into()));
        }

        let mut rng: StdRng = match seed {
            Some(s) => SeedableRng::seed_from_u64(s),
            None => SeedableRng::seed_from_u64(rng().random()),
        };

        let mut particles: Vec<Particle> = Vec::with_capacity(num_particles);
        let max_attempts = 1_000_000usize;
        for id in 0..num_particles {
            let mut attempts = 0usize;
            let r = loop {
                if attempts >= max_attempts {
                    return Err(Error::InvalidParam(format!(
                        "failed to place particle {id} without overlap; try fewer particles or a smaller diameter"
                    )));
                }
                attempts += 1;
                let mut r = [0.0_f64; DIM];
                for (k, r_k) in r.iter_mut().enumerate() {
                    let half = 0.5 * box_size[k];
                    *r_k = rng.random_range(-half..half);
                }
                if !overlaps_existing(&particles, &bc, &r, diameter) {
                    break r;
                }
            };

            let mut v = [0.0_f64; DIM];
            v.iter_mut().for_each(|x| *x = rng.random_range(-1.0..=1.0));

            particles.push(Particle::new(id, r, v, mass)?);
        }

        let dynamics = Dynamics::new(bc, config.stream_frequency);
        let ctx = SimContext::new(particles, dynamics)?.with_interaction(interaction);
        Self::new(ctx, config)
    }

    /// Current system time.
    pub fn time(&self) -> f64 {
        self.ctx.system_time
    }

    pub fn num_particles(&self) -> usize {
        self.ctx.particles.len()
    }

    /// Executed physical and system events (cell transitions excluded).
    pub fn event_count(&self) -> u64 {
        self.ctx.event_count
    }

    /// True once no finite event remains.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn context(&self) -> &SimContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Positions at the current time, folded into the primary image.
    pub fn positions(&self) -> Vec<[f64; DIM]> {
        self.ctx
            .particles
            .iter()
            .map(|p| {
                let mut r = self.ctx.dynamics.current_position(p);
                self.ctx.dynamics.bc().apply(&mut r);
                r
            })
            .collect()
    }

    pub fn velocities(&self) -> Vec<[f64; DIM]> {
        self.ctx.particles.iter().map(|p| p.v).collect()
    }

    pub fn kinetic_energy(&self) -> f64 {
        self.ctx.kinetic_energy()
    }

    pub fn total_energy(&self) -> f64 {
        self.ctx.total_energy()
    }

    /// Register an output plugin.
    pub fn add_plugin(&mut self, plugin: impl OutputPlugin + 'static) {
        self.plugins.push(Box::new(plugin));
    }

    /// First registered plugin of type `T`.
    pub fn plugin<T: Any>(&self) -> Option<&T> {
        self.plugins
            .iter()
            .find_map(|p| p.as_any().downcast_ref::<T>())
    }

    /// Run one scheduler step and notify the plugins of executed events.
    pub fn run_next_event(&mut self) -> Result<EventOutcome> {
        if self.finished {
            return Ok(EventOutcome::Finished);
        }
        let outcome = self.scheduler.run_next_event(&mut self.ctx)?;
        match &outcome {
            EventOutcome::Executed { event, data } => {
                for plugin in &mut self.plugins {
                    plugin.event_update(self.ctx.system_time, event, data);
                }
            }
            EventOutcome::Finished => self.finished = true,
            EventOutcome::Rejected(_) | EventOutcome::Recalculated(_) => {}
        }
        Ok(outcome)
    }

    /// Run until `n` more events have executed or the run finishes.
    /// Returns the number executed.
    ///
    /// Only physical and system events count towards `n`. Cell transitions,
    /// rejections and recalculations run in between without being counted;
    /// each particle's forced periodic update keeps that stretch finite.
    pub fn run_events(&mut self, n: u64) -> Result<u64> {
        let start = self.ctx.event_count;
        while self.ctx.event_count - start < n && !self.finished {
            self.run_next_event()?;
        }
        Ok(self.ctx.event_count - start)
    }

    /// Execute every event up to `target_time`, then stream to it.
    pub fn advance_to(&mut self, target_time: f64) -> Result<()> {
        if !target_time.is_finite() {
            return Err(Error::InvalidParam("target_time must be finite".into()));
        }
        if target_time < self.ctx.system_time - EPS_TIME {
            return Err(Error::InvalidParam(
                "target_time cannot be earlier than current time".into(),
            ));
        }

        while !self.finished {
            let Some(next) = self.scheduler.peek_next_event() else {
                break;
            };
            if !(self.ctx.system_time + next.dt() <= target_time) {
                break;
            }
            self.run_next_event()?;
        }

        let dt = target_time - self.ctx.system_time;
        if dt > 0.0 {
            self.scheduler.stream(&mut self.ctx, dt);
        }
        Ok(())
    }

    /// Rebuild interactions, cell grid and event list from the current state.
    ///
    /// Call after changing particle state or collaborator ranges.
    pub fn reinitialise(&mut self) -> Result<()> {
        self.scheduler.initialise(&mut self.ctx)?;
        self.finished = false;
        Ok(())
    }

    /// Overwrite all positions and rebuild.
    pub fn set_positions(&mut self, positions: &[[f64; DIM]]) -> Result<()> {
        self.check_len(positions.len())?;
        self.ctx.dynamics.update_all(&mut self.ctx.particles);
        for (p, r) in self.ctx.particles.iter_mut().zip(positions) {
            p.set_position(*r)?;
        }
        self.reinitialise()
    }

    /// Overwrite all velocities and rebuild.
    pub fn set_velocities(&mut self, velocities: &[[f64; DIM]]) -> Result<()> {
        self.check_len(velocities.len())?;
        self.ctx.dynamics.update_all(&mut self.ctx.particles);
        for (p, v) in self.ctx.particles.iter_mut().zip(velocities) {
            p.set_velocity(*v)?;
        }
        self.reinitialise()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.ctx.particles.len() {
            return Err(Error::InvalidParam(format!(
                "expected {} rows, got {len}",
                self.ctx.particles.len()
            )));
        }
        Ok(())
    }
}

fn overlaps_existing(existing: &[Particle], bc: &BoundaryCondition, r: &[f64; DIM], diameter: f64) -> bool {
    let min_sq = diameter * diameter;
    existing.iter().any(|p| {
        let d = bc.separation(r, &p.r);
        dot(&d, &d) < min_sq
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::{EventCounter, EventLog, Wall};
    use crate::core::EventType;
    use approx::assert_relative_eq;

    #[test]
    fn make_small_sim_ok() -> Result<()> {
        let mut sim = Simulation::hard_sphere_gas(4, [10.0; 3], 0.4, 1.0, Some(1234), SchedulerConfig::default())?;
        assert_eq!(sim.num_particles(), 4);
        assert!(sim.kinetic_energy().is_finite());
        sim.advance_to(0.1)?;
        assert_relative_eq!(sim.time(), 0.1, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn advance_to_rejects_going_backwards() -> Result<()> {
        let mut sim = Simulation::hard_sphere_gas(4, [10.0; 3], 0.4, 1.0, Some(1), SchedulerConfig::default())?;
        sim.advance_to(1.0)?;
        assert!(sim.advance_to(0.5).is_err());
        assert!(sim.advance_to(f64::NAN).is_err());
        Ok(())
    }

    #[test]
    fn gas_conserves_energy() -> Result<()> {
        let mut sim = Simulation::hard_sphere_gas(64, [8.0; 3], 0.5, 1.0, Some(99), SchedulerConfig::default())?;
        sim.add_plugin(EventCounter::new());
        let e0 = sim.total_energy();
        let ran = sim.run_events(2000)?;
        assert_eq!(ran, 2000);
        assert_relative_eq!(sim.total_energy(), e0, max_relative = 1e-10);
        let counter = sim.plugin::<EventCounter>().ok_or_else(|| Error::Invariant("plugin".into()))?;
        assert_eq!(counter.count(EventType::Core), 2000);
        sim.scheduler().cells().check_membership()
    }

    #[test]
    fn run_events_counts_only_physical_events() -> Result<()> {
        let mut sim = Simulation::hard_sphere_gas(24, [6.0; 3], 0.4, 1.0, Some(17), SchedulerConfig::default())?;
        sim.add_plugin(EventLog::new());
        assert_eq!(sim.run_events(50)?, 50);
        let log = sim.plugin::<EventLog>().ok_or_else(|| Error::Invariant("plugin".into()))?;
        let cells = log.records().iter().filter(|r| r.kind == EventType::Cell).count();
        assert!(cells > 0);
        assert_eq!(log.records().len() - cells, 50);
        assert_eq!(sim.event_count(), 50);
        Ok(())
    }

    #[test]
    fn positions_stay_in_primary_image() -> Result<()> {
        let mut sim = Simulation::hard_sphere_gas(16, [4.0; 3], 0.3, 1.0, Some(5), SchedulerConfig::default())?;
        sim.advance_to(25.0)?;
        for r in sim.positions() {
            assert!(r.iter().all(|x| x.abs() <= 2.0 + 1e-9), "{r:?}");
        }
        Ok(())
    }

    #[test]
    fn setters_validate_and_rebuild() -> Result<()> {
        let mut sim = Simulation::hard_sphere_gas(2, [10.0; 3], 1.0, 1.0, Some(3), SchedulerConfig::default())?;
        assert!(sim.set_positions(&[[0.0; 3]]).is_err());
        sim.set_positions(&[[-2.0, 0.0, 0.0], [2.0, 0.0, 0.0]])?;
        sim.set_velocities(&[[1.0, 0.0, 0.0], [-1.0, 0.0, 0.0]])?;
        // Closing gap of 3 at relative speed 2.
        sim.run_events(1)?;
        assert_relative_eq!(sim.time(), 1.5, epsilon = 1e-9);
        assert_eq!(sim.velocities()[0], [-1.0, 0.0, 0.0]);
        Ok(())
    }

    #[test]
    fn lone_particle_without_events_finishes() -> Result<()> {
        let p = Particle::new(0, [0.0; 3], [0.0; 3], 1.0)?;
        let dynamics = Dynamics::new(BoundaryCondition::open([10.0; 3])?, 1000);
        let ctx = SimContext::new(vec![p], dynamics)?
            .with_local(Wall::new([-5.0, 0.0, 0.0], [1.0, 0.0, 0.0], 0.0, 1.0)?);
        let mut sim = Simulation::new(ctx, SchedulerConfig::default())?;
        assert_eq!(sim.run_next_event()?, EventOutcome::Finished);
        assert!(sim.is_finished());
        sim.advance_to(3.0)?;
        assert_relative_eq!(sim.time(), 3.0);
        Ok(())
    }

    #[test]
    fn context_rejects_misnumbered_particles() -> Result<()> {
        let p = Particle::new(3, [0.0; 3], [0.0; 3], 1.0)?;
        let dynamics = Dynamics::new(BoundaryCondition::open([10.0; 3])?, 1000);
        assert!(SimContext::new(vec![p], dynamics).is_err());
        Ok(())
    }
}
