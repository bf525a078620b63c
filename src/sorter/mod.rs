//! Future event lists.
//!
//! Every particle owns a slot holding a small [`Pel`] of its pending events, with
//! one extra slot (index `N`) for system events. A future event list (FEL) keeps
//! those slots ordered so the globally earliest event is available cheaply.
//!
//! Times handed to [`Fel::push`] and returned by [`Fel::next_event`] are relative
//! to the current system time; internally a peculiar time offset absorbs calls
//! to [`Fel::stream`] so streaming is O(1).

mod bounded_pq;
mod cbt;
mod cbt_fel;
mod pel;

pub use bounded_pq::BoundedPqFel;
pub use cbt_fel::CbtFel;
pub use pel::Pel;

use crate::config::SorterKind;
use crate::core::Event;
use std::fmt;

/// Capability shared by all event sorters.
pub trait Fel: fmt::Debug + Send + Sync {
    /// Type string this sorter is selected by.
    fn name(&self) -> &'static str;

    /// Drop all state and size for `slots` slots, each keeping up to
    /// `pel_capacity` events.
    fn resize(&mut self, slots: usize, pel_capacity: usize);

    /// Number of slots.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a candidate event to `slot`'s list. Infinite-time events are ignored.
    /// Call [`Fel::update`] once the slot's changes are complete.
    fn push(&mut self, event: Event, slot: usize);

    /// Re-rank `slot` after its list changed.
    fn update(&mut self, slot: usize);

    /// Drop every pending event of `slot`. Call [`Fel::update`] afterwards.
    fn clear_pel(&mut self, slot: usize);

    /// Build the ordering structure from the pushed events.
    fn init(&mut self);

    /// Bring the earliest event to the front.
    fn sort(&mut self);

    /// The earliest event (relative time), or `None` when nothing is queued.
    /// Only meaningful after [`Fel::sort`].
    fn next_event(&self) -> Option<Event>;

    /// Time of the earliest event, infinite when nothing is queued.
    fn next_dt(&self) -> f64 {
        self.next_event().map_or(f64::INFINITY, |e| e.dt())
    }

    /// Slot owning the earliest event.
    fn next_id(&self) -> Option<usize> {
        self.next_event().map(|e| e.particle)
    }

    /// Remove the earliest event and re-rank its slot.
    fn pop_next_event(&mut self);

    /// Drop every pending event, keeping the slot layout.
    fn clear(&mut self) {
        for slot in 0..self.len() {
            self.clear_pel(slot);
        }
        self.init();
    }

    /// Advance the clock by `dt`.
    fn stream(&mut self, dt: f64);

    /// Multiply every pending event time by `factor`.
    fn rescale_times(&mut self, factor: f64);

    /// Pending events of `slot` in time order (relative times).
    fn slot_events(&self, slot: usize) -> Vec<Event>;

    /// Entries re-examined from the overflow list; zero for sorters without one.
    fn exception_count(&self) -> usize {
        0
    }
}

/// Construct the sorter selected by `kind`.
pub fn build_sorter(kind: SorterKind) -> Box<dyn Fel> {
    match kind {
        SorterKind::BoundedPq => Box::new(BoundedPqFel::new()),
        SorterKind::Cbt => Box::new(CbtFel::new()),
    }
}

/// Shared by both sorters: relative-time copy of a slot's list.
pub(crate) fn relative_events(pel: &Pel, pec_time: f64) -> Vec<Event> {
    let mut out = Vec::with_capacity(pel.len() + 1);
    let mut tmp = pel.clone();
    while let Some(e) = tmp.top() {
        out.push(e.with_dt(e.dt() - pec_time));
        tmp.pop();
    }
    out
}
