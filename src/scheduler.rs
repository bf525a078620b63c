//! Event scheduler.
//!
//! Owns the future event list, the cell grid and the per-particle generation
//! counters, and drives the select / revalidate / execute / invalidate cycle.
//! The [`SchedulerKind`] decides where candidate partners come from: the cell
//! grid, every other particle, or nowhere at all.
//! Pair events are never cancelled eagerly: each carries the partner's
//! generation counter from when it was queued and is dropped at pop time if
//! the partner has moved on since.

use crate::cells::{CellGrid, CELL_GLOBAL_ID};
use crate::config::{SchedulerConfig, SchedulerKind};
use crate::core::sim::SimContext;
use crate::core::{Event, EventSource, EventType};
use crate::error::{Error, Result};
use crate::physics::{EventData, Global};
use crate::sentinel::{PbcSentinel, SENTINEL_GLOBAL_ID};
use crate::sorter::{build_sorter, Fel};
use tracing::{debug, info, info_span, trace, warn};

/// Result of one call to [`Scheduler::run_next_event`].
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// The event ran; system time is now at the event.
    Executed { event: Event, data: EventData },
    /// Revalidation superseded the event; both particles were refreshed and
    /// system time did not move.
    Rejected(Event),
    /// A particle's (or the system slot's) events were recomputed.
    Recalculated(usize),
    /// Nothing will ever happen again.
    Finished,
}

/// Counters on revalidation rejections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RejectionStats {
    pub total: u64,
    /// Longest run of consecutive rejections seen.
    pub max_consecutive: usize,
}

#[derive(Debug)]
pub struct Scheduler {
    config: SchedulerConfig,
    sorter: Box<dyn Fel>,
    cells: CellGrid,
    /// Present whenever the cell grid is in use.
    sentinel: Option<PbcSentinel>,
    event_count: Vec<u64>,
    interaction_rejections: usize,
    local_rejections: usize,
    stats: RejectionStats,
    scratch: Vec<usize>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sorter: build_sorter(config.sorter),
            cells: CellGrid::new(&config),
            sentinel: None,
            config,
            event_count: Vec::new(),
            interaction_rejections: 0,
            local_rejections: 0,
            stats: RejectionStats::default(),
            scratch: Vec::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The cell grid. Empty unless the scheduler kind is
    /// [`SchedulerKind::NeighbourList`].
    pub fn cells(&self) -> &CellGrid {
        &self.cells
    }

    pub fn sentinel(&self) -> Option<&PbcSentinel> {
        self.sentinel.as_ref()
    }

    pub fn sorter(&self) -> &dyn Fel {
        self.sorter.as_ref()
    }

    pub fn event_counts(&self) -> &[u64] {
        &self.event_count
    }

    pub fn rejection_stats(&self) -> RejectionStats {
        self.stats
    }

    /// FEL slot holding the system events.
    fn system_slot(&self) -> usize {
        self.event_count.len()
    }

    /// Bring every collaborator up to date and build the grid and queue.
    pub fn initialise(&mut self, ctx: &mut SimContext) -> Result<()> {
        let _span = info_span!(
            "Scheduler::initialise",
            n = ctx.particles.len(),
            kind = self.config.scheduler.as_str()
        )
        .entered();
        ctx.dynamics.update_all(&mut ctx.particles);
        for interaction in &mut ctx.interactions {
            interaction.initialise(&ctx.particles, &ctx.dynamics)?;
        }
        if self.config.scheduler == SchedulerKind::NeighbourList {
            let range = ctx.max_interaction_distance();
            self.cells.add_cells(range, &ctx.particles, &ctx.dynamics)?;
            let box_size = ctx.dynamics.bc().box_size();
            self.sentinel = Some(PbcSentinel::new(box_size, self.cells.cell_dimension())?);
        }
        self.rebuild_list(ctx)
    }

    /// Recompute every particle's events and re-instrument the sorter.
    pub fn rebuild_list(&mut self, ctx: &mut SimContext) -> Result<()> {
        let _span = info_span!("Scheduler::rebuild_list", sorter = self.sorter.name()).entered();
        let n = ctx.particles.len();
        self.sorter.resize(n + 1, self.config.pel_capacity);
        self.event_count = vec![0; n];
        self.interaction_rejections = 0;
        self.local_rejections = 0;
        for id in 0..n {
            self.add_events(ctx, id)?;
        }
        self.sorter.init();
        self.rebuild_system_events(ctx)?;
        info!(particles = n, "event list rebuilt");
        Ok(())
    }

    /// Replace the system slot with a fresh event from every system.
    pub fn rebuild_system_events(&mut self, ctx: &SimContext) -> Result<()> {
        let slot = self.system_slot();
        self.sorter.clear_pel(slot);
        for (id, system) in ctx.systems.iter().enumerate() {
            let event = Event::new(system.dt(), slot, EventSource::System { id }, system.kind())?;
            self.sorter.push(event, slot);
        }
        self.sorter.update(slot);
        Ok(())
    }

    /// Queue every candidate event of `id` into its slot. Does not re-rank the slot.
    fn add_events(&mut self, ctx: &mut SimContext, id: usize) -> Result<()> {
        ctx.dynamics.update_particle(&mut ctx.particles[id]);
        if self.config.scheduler == SchedulerKind::SystemOnly {
            return Ok(());
        }
        let p = &ctx.particles[id];

        if let Some(sentinel) = &self.sentinel {
            if Global::is_interaction(&self.cells, p) {
                let event = Global::get_event(&self.cells, p, &ctx.dynamics, CELL_GLOBAL_ID)?;
                self.sorter.push(event, id);
            }
            let event = sentinel.get_event(p, &ctx.dynamics, SENTINEL_GLOBAL_ID)?;
            if event.is_some() {
                self.sorter.push(event, id);
            }
        }
        for (lid, local) in ctx.locals.iter().enumerate() {
            if local.is_interaction(p) {
                let event = local.get_event(p, &ctx.dynamics, lid)?;
                if event.is_some() {
                    self.sorter.push(event, id);
                }
            }
        }

        let mut neighbours = std::mem::take(&mut self.scratch);
        neighbours.clear();
        match self.config.scheduler {
            SchedulerKind::NeighbourList => self.cells.for_each_neighbour(id, |nb| neighbours.push(nb)),
            _ => neighbours.extend((0..ctx.particles.len()).filter(|&nb| nb != id)),
        }
        let result = neighbours
            .iter()
            .try_for_each(|&nb| self.add_interaction_event(ctx, id, nb));
        self.scratch = neighbours;
        result
    }

    /// Queue the next pair event of `p1` and `p2` into `p1`'s slot.
    pub fn add_interaction_event(&mut self, ctx: &mut SimContext, p1: usize, p2: usize) -> Result<()> {
        if p1 == p2 {
            return Ok(());
        }
        ctx.dynamics.update_particle_pair(&mut ctx.particles, p1, p2)?;
        let mut event = ctx.interaction_event(p1, p2)?;
        if event.is_some() {
            event.stamp_partner_count(self.event_count[p2]);
            self.sorter.push(event, p1);
        }
        Ok(())
    }

    /// Invalidate and recompute all events of one particle.
    pub fn full_update(&mut self, ctx: &mut SimContext, id: usize) -> Result<()> {
        self.event_count[id] += 1;
        self.sorter.clear_pel(id);
        self.add_events(ctx, id)?;
        self.sorter.update(id);
        Ok(())
    }

    /// Invalidate and recompute the events of a pair. Both counters move
    /// before either list is rebuilt so the stamps are current.
    pub fn full_update_pair(&mut self, ctx: &mut SimContext, p1: usize, p2: usize) -> Result<()> {
        self.event_count[p1] += 1;
        self.event_count[p2] += 1;
        self.sorter.clear_pel(p1);
        self.sorter.clear_pel(p2);
        self.add_events(ctx, p1)?;
        self.add_events(ctx, p2)?;
        self.sorter.update(p1);
        self.sorter.update(p2);
        Ok(())
    }

    /// Earliest live event, discarding stale pair events on the way.
    pub fn peek_next_event(&mut self) -> Option<Event> {
        loop {
            self.sorter.sort();
            let event = self.sorter.next_event()?;
            if event.is_stale(&self.event_count) {
                trace!(%event, "discarding stale event");
                self.sorter.pop_next_event();
                continue;
            }
            return Some(event);
        }
    }

    /// Advance the clock of every time-keeping component by `dt`.
    pub fn stream(&mut self, ctx: &mut SimContext, dt: f64) {
        ctx.stream(dt);
        self.sorter.stream(dt);
    }

    /// Select, revalidate and run the next event.
    pub fn run_next_event(&mut self, ctx: &mut SimContext) -> Result<EventOutcome> {
        let Some(event) = self.peek_next_event() else {
            info!(time = ctx.system_time, "event list exhausted");
            return Ok(EventOutcome::Finished);
        };
        if event.dt().is_nan() {
            return Err(Error::NanEventTime {
                particle: event.particle,
                kind: format!("{} {:?}", event.source.name(), event.kind),
                time: ctx.system_time,
            });
        }
        if event.dt().is_infinite() {
            info!(time = ctx.system_time, "no finite events remain");
            return Ok(EventOutcome::Finished);
        }
        if event.kind == EventType::None {
            return Err(Error::NoneEventAtFront {
                particle: event.particle,
                time: ctx.system_time,
            });
        }

        match event.source {
            EventSource::Interaction { id, partner, .. } => self.run_interaction(ctx, event, id, partner),
            EventSource::Global { id: SENTINEL_GLOBAL_ID } => self.run_sentinel(ctx, event),
            EventSource::Global { .. } => self.run_global(ctx, event),
            EventSource::Local { id } => self.run_local(ctx, event, id),
            EventSource::System { id } => self.run_system(ctx, event, id),
            EventSource::Scheduler => self.run_virtual(ctx, event),
        }
    }

    fn note_rejection(&mut self, consecutive: usize) {
        self.stats.total += 1;
        self.stats.max_consecutive = self.stats.max_consecutive.max(consecutive);
    }

    fn run_interaction(
        &mut self,
        ctx: &mut SimContext,
        event: Event,
        iid: usize,
        p2: usize,
    ) -> Result<EventOutcome> {
        let p1 = event.particle;
        self.sorter.pop_next_event();
        self.sorter.sort();
        let next_dt = self.sorter.next_dt();

        ctx.dynamics.update_particle_pair(&mut ctx.particles, p1, p2)?;
        let interaction = ctx
            .interactions
            .get(iid)
            .ok_or_else(|| Error::Invariant(format!("event names unknown interaction {iid}")))?;
        let fresh = interaction.get_event(&ctx.particles[p1], &ctx.particles[p2], &ctx.dynamics, iid)?;

        if fresh.kind == EventType::None
            || (fresh.dt() > next_dt && self.interaction_rejections < self.config.rejection_limit)
        {
            self.interaction_rejections += 1;
            self.note_rejection(self.interaction_rejections);
            debug!(%event, recomputed = %fresh, next_dt, "interaction rejected");
            self.full_update_pair(ctx, p1, p2)?;
            return Ok(EventOutcome::Rejected(event));
        }
        if self.interaction_rejections >= self.config.rejection_limit {
            warn!(%fresh, "rejection limit reached, forcing interaction");
        }
        self.interaction_rejections = 0;

        self.stream(ctx, fresh.dt());
        ctx.event_count += 1;
        ctx.dynamics.update_particle_pair(&mut ctx.particles, p1, p2)?;
        let data = ctx.interactions[iid].run_event(&mut ctx.particles, &fresh, &ctx.dynamics)?;
        self.full_update_pair(ctx, p1, p2)?;
        trace!(%fresh, time = ctx.system_time, "interaction executed");
        Ok(EventOutcome::Executed {
            event: fresh,
            data: EventData::Pair(data),
        })
    }

    fn run_local(&mut self, ctx: &mut SimContext, event: Event, lid: usize) -> Result<EventOutcome> {
        let part = event.particle;
        self.sorter.pop_next_event();
        self.sorter.sort();
        let next_dt = self.sorter.next_dt();

        ctx.dynamics.update_particle(&mut ctx.particles[part]);
        let local = ctx
            .locals
            .get(lid)
            .ok_or_else(|| Error::Invariant(format!("event names unknown local {lid}")))?;
        let fresh = local.get_event(&ctx.particles[part], &ctx.dynamics, lid)?;

        if fresh.kind == EventType::None
            || (fresh.dt() > next_dt && self.local_rejections < self.config.rejection_limit)
        {
            self.local_rejections += 1;
            self.note_rejection(self.local_rejections);
            debug!(%event, recomputed = %fresh, next_dt, "local event rejected");
            self.full_update(ctx, part)?;
            return Ok(EventOutcome::Rejected(event));
        }
        self.local_rejections = 0;

        self.stream(ctx, fresh.dt());
        ctx.event_count += 1;
        let SimContext {
            particles,
            dynamics,
            locals,
            ..
        } = ctx;
        let p = &mut particles[part];
        dynamics.update_particle(p);
        let data = locals[lid].run_event(p, &fresh, dynamics)?;
        self.full_update(ctx, part)?;
        Ok(EventOutcome::Executed {
            event: fresh,
            data: EventData::Particle(data),
        })
    }

    /// Cell transitions do not move the system clock: the event is the
    /// earliest in the queue, so nothing can happen before it anyway.
    fn run_global(&mut self, ctx: &mut SimContext, event: Event) -> Result<EventOutcome> {
        let part = event.particle;
        self.sorter.pop_next_event();
        let outcome = self.cells.run_event(&mut ctx.particles, part, &ctx.dynamics)?;
        for &nb in &outcome.new_neighbours {
            self.add_interaction_event(ctx, part, nb)?;
        }
        let next = Global::get_event(&self.cells, &ctx.particles[part], &ctx.dynamics, CELL_GLOBAL_ID)?;
        self.sorter.push(next, part);
        self.sorter.update(part);
        Ok(EventOutcome::Executed {
            event,
            data: EventData::Cell(outcome),
        })
    }

    /// Bring the clock up to the forced update and rebuild the particle's
    /// events, pulling its cell back in line with its position.
    fn run_sentinel(&mut self, ctx: &mut SimContext, event: Event) -> Result<EventOutcome> {
        self.stream(ctx, event.dt());
        self.full_update(ctx, event.particle)?;
        trace!(particle = event.particle, time = ctx.system_time, "sentinel update");
        Ok(EventOutcome::Recalculated(event.particle))
    }

    fn run_system(&mut self, ctx: &mut SimContext, event: Event, sid: usize) -> Result<EventOutcome> {
        self.stream(ctx, event.dt());
        ctx.event_count += 1;
        let system = ctx
            .systems
            .get_mut(sid)
            .ok_or_else(|| Error::Invariant(format!("event names unknown system {sid}")))?;
        let outcome = system.run_event(&mut ctx.particles, &ctx.dynamics)?;
        if let Some(factor) = outcome.time_rescale {
            self.sorter.rescale_times(factor);
        }
        for &id in &outcome.changed {
            self.full_update(ctx, id)?;
        }
        self.rebuild_system_events(ctx)?;
        debug!(%event, changed = outcome.changed.len(), "system event executed");
        Ok(EventOutcome::Executed {
            event,
            data: EventData::System(outcome),
        })
    }

    fn run_virtual(&mut self, ctx: &mut SimContext, event: Event) -> Result<EventOutcome> {
        self.stream(ctx, event.dt());
        if event.particle == self.system_slot() {
            self.rebuild_system_events(ctx)?;
        } else {
            self.full_update(ctx, event.particle)?;
        }
        trace!(particle = event.particle, "events recalculated");
        Ok(EventOutcome::Recalculated(event.particle))
    }
}
