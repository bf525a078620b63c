//! Heap-only future event list.
//!
//! Every slot's [`Pel`] competes directly in one tournament tree; there is no
//! calendar in front of it.

use super::cbt::Cbt;
use super::pel::Pel;
use super::{relative_events, Fel};
use crate::core::Event;

/// Fold the peculiar time into the stored events this often.
const STREAM_FREQUENCY: usize = 1000;

/// Future event list backed only by a tournament tree over all slots.
///
/// O(log N) per update; slots with nothing pending are kept out of the tree.
#[derive(Debug, Clone, Default)]
pub struct CbtFel {
    pels: Vec<Pel>,
    cbt: Cbt,
    pec_time: f64,
    n_streams: usize,
}

impl CbtFel {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Fel for CbtFel {
    fn name(&self) -> &'static str {
        "CBT"
    }

    fn resize(&mut self, slots: usize, pel_capacity: usize) {
        // Index 0 is the tree's null slot.
        self.pels = (0..=slots)
            .map(|p| Pel::new(p.saturating_sub(1), pel_capacity))
            .collect();
        self.cbt = Cbt::new(slots);
        self.pec_time = 0.0;
        self.n_streams = 0;
    }

    fn len(&self) -> usize {
        self.pels.len().saturating_sub(1)
    }

    fn push(&mut self, event: Event, slot: usize) {
        if !event.dt().is_finite() {
            return;
        }
        let mut event = event;
        event.shift(self.pec_time);
        self.pels[slot + 1].push(event);
    }

    fn update(&mut self, slot: usize) {
        let p = slot + 1;
        if self.pels[p].is_empty() {
            self.cbt.delete(p, &self.pels);
        } else if self.cbt.contains(p) {
            self.cbt.update(p, &self.pels);
        } else {
            self.cbt.insert(p, &self.pels);
        }
    }

    fn clear_pel(&mut self, slot: usize) {
        self.pels[slot + 1].clear();
    }

    fn init(&mut self) {
        self.cbt.clear();
        for slot in 0..self.len() {
            self.update(slot);
        }
    }

    fn sort(&mut self) {}

    fn next_event(&self) -> Option<Event> {
        let top = self.cbt.top()?;
        self.pels[top]
            .top()
            .map(|e| e.with_dt(e.dt() - self.pec_time))
    }

    fn pop_next_event(&mut self) {
        if let Some(top) = self.cbt.top() {
            self.pels[top].pop();
            self.update(top - 1);
        }
    }

    fn stream(&mut self, dt: f64) {
        self.pec_time += dt;
        self.n_streams += 1;
        if self.n_streams % STREAM_FREQUENCY == 0 {
            for pel in &mut self.pels {
                pel.stream(self.pec_time);
            }
            self.pec_time = 0.0;
        }
    }

    fn rescale_times(&mut self, factor: f64) {
        for pel in &mut self.pels {
            pel.rescale_times(factor);
        }
        self.pec_time *= factor;
    }

    fn slot_events(&self, slot: usize) -> Vec<Event> {
        relative_events(&self.pels[slot + 1], self.pec_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventSource, EventType};
    use crate::error::Result;

    fn wall(dt: f64, id: usize) -> Result<Event> {
        Event::new(dt, id, EventSource::Local { id: 0 }, EventType::Wall)
    }

    #[test]
    fn empty_slots_stay_out_of_the_tree() -> Result<()> {
        let mut fel = CbtFel::new();
        fel.resize(4, 2);
        fel.push(wall(2.0, 1)?, 1);
        fel.init();
        assert_eq!(fel.cbt.top(), Some(2));
        assert!(!fel.cbt.contains(1) && !fel.cbt.contains(3));
        fel.pop_next_event();
        assert!(fel.next_event().is_none());
        Ok(())
    }

    #[test]
    fn folding_the_pec_time_preserves_relative_times() -> Result<()> {
        let mut fel = CbtFel::new();
        fel.resize(1, 2);
        fel.push(wall(2.0 * STREAM_FREQUENCY as f64, 0)?, 0);
        fel.init();
        for _ in 0..STREAM_FREQUENCY {
            fel.stream(1.0);
        }
        assert_eq!(fel.pec_time, 0.0);
        let next = fel.next_event().expect("queued");
        assert!((next.dt() - STREAM_FREQUENCY as f64).abs() < 1e-9);
        Ok(())
    }
}
