//! Output plugins notified after every executed event.

use super::system::SystemOutcome;
use super::GlobalOutcome;
use crate::core::dynamics::{PairEventData, ParticleEventData};
use crate::core::{Event, EventType};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

/// What an executed event did.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    Pair(PairEventData),
    Particle(ParticleEventData),
    Cell(GlobalOutcome),
    System(SystemOutcome),
}

impl EventData {
    /// Executed event type; differs from the queued one when a well exit bounces.
    pub fn kind(&self) -> EventType {
        match self {
            EventData::Pair(d) => d.kind,
            EventData::Particle(d) => d.kind,
            EventData::Cell(d) => d.kind,
            EventData::System(d) => d.kind,
        }
    }

    pub fn delta_ke(&self) -> f64 {
        match self {
            EventData::Pair(d) => d.delta_ke,
            EventData::Particle(d) => d.delta_ke,
            EventData::Cell(_) => 0.0,
            EventData::System(d) => d.delta_ke,
        }
    }
}

pub trait OutputPlugin: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Called with the system time after the event ran.
    fn event_update(&mut self, time: f64, event: &Event, data: &EventData);

    fn as_any(&self) -> &dyn Any;
}

/// Counts executed events by type.
#[derive(Debug, Clone, Default)]
pub struct EventCounter {
    counts: BTreeMap<EventType, u64>,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: EventType) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn counts(&self) -> &BTreeMap<EventType, u64> {
        &self.counts
    }
}

impl OutputPlugin for EventCounter {
    fn name(&self) -> &str {
        "EventCounter"
    }

    fn event_update(&mut self, _time: f64, _event: &Event, data: &EventData) {
        *self.counts.entry(data.kind()).or_insert(0) += 1;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One line of an [`EventLog`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub time: f64,
    pub kind: EventType,
    pub particle: usize,
    pub partner: Option<usize>,
    pub delta_ke: f64,
}

/// Records every executed event, optionally capped at `capacity` records.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    records: Vec<EventRecord>,
    capacity: Option<usize>,
    skip_cells: bool,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Do not record neighbour-list cell transitions.
    pub fn skip_cells(mut self) -> Self {
        self.skip_cells = true;
        self
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }
}

impl OutputPlugin for EventLog {
    fn name(&self) -> &str {
        "EventLog"
    }

    fn event_update(&mut self, time: f64, event: &Event, data: &EventData) {
        if self.skip_cells && matches!(data, EventData::Cell(_)) {
            return;
        }
        if self.capacity.is_some_and(|c| self.records.len() >= c) {
            return;
        }
        self.records.push(EventRecord {
            time,
            kind: data.kind(),
            particle: event.particle,
            partner: event.partner(),
            delta_ke: data.delta_ke(),
        });
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EventSource;
    use crate::error::Result;

    fn wall_data(particle: usize) -> EventData {
        EventData::Particle(ParticleEventData {
            particle,
            kind: EventType::Wall,
            delta_ke: 0.0,
        })
    }

    #[test]
    fn counter_groups_by_executed_type() -> Result<()> {
        let mut counter = EventCounter::new();
        let ev = Event::new(1.0, 3, EventSource::Local { id: 0 }, EventType::Wall)?;
        counter.event_update(1.0, &ev, &wall_data(3));
        counter.event_update(2.0, &ev, &wall_data(3));
        assert_eq!(counter.count(EventType::Wall), 2);
        assert_eq!(counter.count(EventType::Core), 0);
        assert_eq!(counter.total(), 2);
        Ok(())
    }

    #[test]
    fn log_respects_capacity() -> Result<()> {
        let mut log = EventLog::with_capacity(1);
        let ev = Event::new(1.0, 3, EventSource::Local { id: 0 }, EventType::Wall)?;
        log.event_update(1.0, &ev, &wall_data(3));
        log.event_update(2.0, &ev, &wall_data(3));
        assert_eq!(log.records().len(), 1);
        assert_eq!(log.records()[0].particle, 3);
        assert_eq!(log.records()[0].partner, None);

        let plugin: Box<dyn OutputPlugin> = Box::new(log);
        assert!(plugin.as_any().downcast_ref::<EventLog>().is_some());
        Ok(())
    }
}
