use crate::error::{Error, Result};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::fmt;

/// Physical or bookkeeping type of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    /// Sentinel: nothing will happen.
    None,
    /// The particle's events must be recomputed from scratch.
    Virtual,
    /// Cell-boundary crossing of the neighbour list.
    Cell,
    /// Hard-core collision.
    Core,
    /// Pair enters a square well.
    WellIn,
    /// Pair leaves a square well.
    WellOut,
    /// Pair tried to leave a well without enough kinetic energy.
    Bounce,
    /// Reflection off a stationary wall.
    Wall,
    /// Periodic sampling tick.
    Ticker,
    /// Global velocity rescale.
    Rescale,
    /// Stochastic thermostat kick.
    Thermostat,
}

/// Which collaborator produced an event, with the ids it needs to be re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    /// Pair event from interaction `id` with particle `partner`.
    ///
    /// `partner_count` snapshots the partner's generation counter when the
    /// event entered the queue; a mismatch at pop time marks the event stale.
    Interaction {
        id: usize,
        partner: usize,
        partner_count: u64,
    },
    /// Single-particle event from global `id` (e.g. the cell grid).
    Global { id: usize },
    /// Single-particle event from local `id` (e.g. a wall).
    Local { id: usize },
    /// System event from system `id`; not tied to a particle.
    System { id: usize },
    /// Generated by the event lists themselves (recalculation, sentinel).
    Scheduler,
}

impl EventSource {
    #[inline]
    fn order_key(&self) -> (u8, usize) {
        match *self {
            EventSource::Interaction { partner, .. } => (0, partner),
            EventSource::Local { id } => (1, id),
            EventSource::Global { id } => (2, id),
            EventSource::System { id } => (3, id),
            EventSource::Scheduler => (4, 0),
        }
    }

    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            EventSource::Interaction { .. } => "Interaction",
            EventSource::Global { .. } => "Global",
            EventSource::Local { .. } => "Local",
            EventSource::System { .. } => "System",
            EventSource::Scheduler => "Scheduler",
        }
    }
}

/// A candidate event with a time *relative to now*.
///
/// `dt` is never NaN. Infinite `dt` means the event never happens; small negative
/// values are tolerated. Ordering is by `dt`, then by source, then by particle ids,
/// giving a deterministic total order.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    dt: f64,
    /// Particle owning the event (the system slot for system events).
    pub particle: usize,
    /// Producer of the event.
    pub source: EventSource,
    /// Event type tag.
    pub kind: EventType,
}

impl Event {
    /// Create a new event, rejecting NaN times.
    pub fn new(dt: f64, particle: usize, source: EventSource, kind: EventType) -> Result<Self> {
        if dt.is_nan() {
            return Err(Error::NanEventTime {
                particle,
                kind: format!("{} {:?}", source.name(), kind),
                time: dt,
            });
        }
        Ok(Self {
            dt,
            particle,
            source,
            kind,
        })
    }

    /// An event that never happens.
    pub fn none(particle: usize, source: EventSource) -> Self {
        Self {
            dt: f64::INFINITY,
            particle,
            source,
            kind: EventType::None,
        }
    }

    /// Recalculation marker for `particle` at `dt`.
    pub fn recalculate(dt: f64, particle: usize) -> Self {
        Self {
            dt,
            particle,
            source: EventSource::Scheduler,
            kind: EventType::Virtual,
        }
    }

    /// Time until the event.
    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Copy of this event with a different time.
    #[inline]
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    #[inline]
    pub(crate) fn shift(&mut self, by: f64) {
        self.dt += by;
    }

    #[inline]
    pub(crate) fn scale(&mut self, factor: f64) {
        self.dt *= factor;
    }

    /// True for events that will actually occur.
    #[inline]
    pub fn is_some(&self) -> bool {
        self.kind != EventType::None && self.dt.is_finite()
    }

    /// Partner particle of an interaction event.
    #[inline]
    pub fn partner(&self) -> Option<usize> {
        match self.source {
            EventSource::Interaction { partner, .. } => Some(partner),
            _ => None,
        }
    }

    /// Record the partner's current generation counter on an interaction event.
    #[inline]
    pub fn stamp_partner_count(&mut self, count: u64) {
        if let EventSource::Interaction {
            ref mut partner_count,
            ..
        } = self.source
        {
            *partner_count = count;
        }
    }

    /// Lazy-invalidation check: stale if the partner has had an event since this
    /// one was queued. Non-interaction events are never stale.
    #[inline]
    pub fn is_stale(&self, event_count: &[u64]) -> bool {
        match self.source {
            EventSource::Interaction {
                partner,
                partner_count,
                ..
            } => event_count.get(partner).copied() != Some(partner_count),
            _ => false,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.partner() {
            Some(p2) => write!(
                f,
                "{} {:?} p{}-p{} dt={}",
                self.source.name(),
                self.kind,
                self.particle,
                p2,
                self.dt
            ),
            None => write!(
                f,
                "{} {:?} p{} dt={}",
                self.source.name(),
                self.kind,
                self.particle,
                self.dt
            ),
        }
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        OrderedFloat(self.dt)
            .cmp(&OrderedFloat(other.dt))
            .then_with(|| self.source.order_key().cmp(&other.source.order_key()))
            .then_with(|| self.particle.cmp(&other.particle))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(dt: f64, p1: usize, p2: usize) -> Result<Event> {
        Event::new(
            dt,
            p1,
            EventSource::Interaction {
                id: 0,
                partner: p2,
                partner_count: 0,
            },
            EventType::Core,
        )
    }

    #[test]
    fn new_event_rejects_nan_time() {
        let err = pair(f64::NAN, 1, 2).unwrap_err();
        assert!(err.to_string().contains("NaN"));
    }

    #[test]
    fn infinite_and_negative_times_are_accepted() -> Result<()> {
        let never = pair(f64::INFINITY, 0, 1)?;
        assert!(!never.is_some());
        let late = pair(-1e-14, 0, 1)?;
        assert!(late.is_some());
        assert!(late < never);
        Ok(())
    }

    #[test]
    fn ordering_by_time() -> Result<()> {
        let e1 = pair(1.0, 0, 1)?;
        let e2 = Event::new(2.0, 0, EventSource::Local { id: 0 }, EventType::Wall)?;
        assert!(e1 < e2);
        Ok(())
    }

    #[test]
    fn tie_breaker_prefers_interactions() -> Result<()> {
        let a = pair(5.0, 0, 1)?;
        let b = Event::new(5.0, 0, EventSource::Global { id: 0 }, EventType::Cell)?;
        assert!(a < b);
        Ok(())
    }

    #[test]
    fn staleness_follows_partner_counter() -> Result<()> {
        let mut e = pair(1.0, 0, 2)?;
        e.stamp_partner_count(4);
        let mut counts = vec![0, 0, 4];
        assert!(!e.is_stale(&counts));
        counts[2] += 1;
        assert!(e.is_stale(&counts));
        // Own counter changes do not matter for the partner check.
        counts[0] += 10;
        counts[2] = 4;
        assert!(!e.is_stale(&counts));

        let wall = Event::new(1.0, 0, EventSource::Local { id: 0 }, EventType::Wall)?;
        assert!(!wall.is_stale(&counts));
        Ok(())
    }

    #[test]
    fn display_names_participants() -> Result<()> {
        let e = pair(0.5, 3, 9)?;
        let s = e.to_string();
        assert!(s.contains("p3-p9"));
        assert!(s.contains("Core"));
        Ok(())
    }
}
