//! Per-particle event lists with a bounded capacity.

use crate::core::Event;

/// Bounded per-particle event list.
///
/// Keeps the `capacity` earliest events in ascending order. When a push would
/// exceed the capacity the latest event is dropped and its time remembered; once
/// the retained events are used up the list reports a recalculation event at
/// the earliest dropped time, so nothing that was dropped can be skipped.
#[derive(Debug, Clone)]
pub struct Pel {
    owner: usize,
    capacity: usize,
    events: Vec<Event>,
    recalc_dt: f64,
}

impl Pel {
    pub fn new(owner: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            owner,
            capacity,
            events: Vec::with_capacity(capacity + 1),
            recalc_dt: f64::INFINITY,
        }
    }

    pub fn push(&mut self, event: Event) {
        let at = self.events.partition_point(|e| e <= &event);
        self.events.insert(at, event);
        if self.events.len() > self.capacity {
            if let Some(dropped) = self.events.pop() {
                self.recalc_dt = self.recalc_dt.min(dropped.dt());
            }
        }
    }

    /// Earliest pending event, including a pending recalculation.
    pub fn top(&self) -> Option<Event> {
        match self.events.first() {
            Some(e) => Some(*e),
            None if self.recalc_dt.is_finite() => {
                Some(Event::recalculate(self.recalc_dt, self.owner))
            }
            None => None,
        }
    }

    /// Time of [`Pel::top`], infinite when empty.
    #[inline]
    pub fn next_dt(&self) -> f64 {
        self.events
            .first()
            .map(Event::dt)
            .unwrap_or(self.recalc_dt)
    }

    pub fn pop(&mut self) {
        if self.events.is_empty() {
            self.recalc_dt = f64::INFINITY;
        } else {
            self.events.remove(0);
        }
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.recalc_dt = f64::INFINITY;
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && !self.recalc_dt.is_finite()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True once events have been dropped and not yet recalculated.
    #[inline]
    pub fn has_overflowed(&self) -> bool {
        self.recalc_dt.is_finite()
    }

    /// Shift every stored time back by `dt`.
    pub fn stream(&mut self, dt: f64) {
        for e in &mut self.events {
            e.shift(-dt);
        }
        self.recalc_dt -= dt;
    }

    pub fn rescale_times(&mut self, factor: f64) {
        for e in &mut self.events {
            e.scale(factor);
        }
        self.recalc_dt *= factor;
    }

    /// Tournament comparison: does `self` fire strictly after `other`?
    #[inline]
    pub(crate) fn later_than(&self, other: &Pel) -> bool {
        match (self.top(), other.top()) {
            (Some(a), Some(b)) => a > b,
            (None, Some(_)) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventSource, EventType};
    use crate::error::Result;

    fn wall(dt: f64) -> Result<Event> {
        Event::new(dt, 0, EventSource::Local { id: 0 }, EventType::Wall)
    }

    #[test]
    fn keeps_events_sorted() -> Result<()> {
        let mut pel = Pel::new(0, 4);
        for dt in [3.0, 1.0, 2.0] {
            pel.push(wall(dt)?);
        }
        assert_eq!(pel.next_dt(), 1.0);
        pel.pop();
        assert_eq!(pel.next_dt(), 2.0);
        pel.pop();
        pel.pop();
        assert!(pel.is_empty());
        assert!(pel.top().is_none());
        Ok(())
    }

    #[test]
    fn overflow_surfaces_a_recalculation() -> Result<()> {
        let mut pel = Pel::new(5, 2);
        for dt in [4.0, 1.0, 3.0, 2.0] {
            pel.push(wall(dt)?);
        }
        assert_eq!(pel.len(), 2);
        assert!(pel.has_overflowed());
        pel.pop();
        pel.pop();
        let top = pel.top().expect("recalculation pending");
        assert_eq!(top.kind, EventType::Virtual);
        assert_eq!(top.particle, 5);
        assert_eq!(top.dt(), 3.0);
        pel.pop();
        assert!(pel.is_empty());
        Ok(())
    }

    #[test]
    fn stream_and_rescale_shift_all_times() -> Result<()> {
        let mut pel = Pel::new(0, 1);
        pel.push(wall(2.0)?);
        pel.push(wall(6.0)?);
        pel.stream(1.0);
        assert_eq!(pel.next_dt(), 1.0);
        pel.rescale_times(2.0);
        assert_eq!(pel.next_dt(), 2.0);
        pel.pop();
        assert_eq!(pel.next_dt(), 10.0);
        Ok(())
    }

    #[test]
    fn empty_list_loses_tournament() -> Result<()> {
        let empty = Pel::new(0, 1);
        let mut full = Pel::new(1, 1);
        full.push(wall(1.0)?);
        assert!(empty.later_than(&full));
        assert!(!full.later_than(&empty));
        assert!(!empty.later_than(&Pel::new(2, 1)));
        Ok(())
    }
}
