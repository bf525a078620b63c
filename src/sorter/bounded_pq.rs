//! Bounded priority queue: a calendar queue whose active bucket is a
//! tournament tree.
//!
//! Time is cut into `nlists` buckets of width `1 / scale`, covering a calendar
//! of length `list_width = nlists / scale`. Slots whose next event falls in the
//! active bucket (`current_index`) live in the tree; the rest sit in intrusive
//! doubly linked bucket lists, and anything beyond the calendar goes to an extra
//! overflow list (index `nlists`) that is re-bucketed once per wrap.
//!
//! Stored times are offsets from the calendar origin; `pec_time` is how far the
//! clock has moved past that origin.

use super::cbt::{Cbt, TournamentKey};
use super::pel::Pel;
use super::{relative_events, Fel};
use crate::core::Event;
use tracing::{debug, info_span, trace};

/// Fewer finite events than this and the queue runs as a plain tree.
const MIN_INSTRUMENTED_EVENTS: usize = 10;

/// Upper bound on the number of calendar buckets.
const MAX_LISTS: usize = 1 << 22;

/// Peculiar-time fold period while running as a plain tree.
const STREAM_FREQUENCY: usize = 1000;

#[derive(Debug, Clone)]
struct Slot {
    pel: Pel,
    next: Option<usize>,
    previous: Option<usize>,
    q_index: Option<usize>,
}

impl Slot {
    fn new(owner: usize, pel_capacity: usize) -> Self {
        Self {
            pel: Pel::new(owner, pel_capacity),
            next: None,
            previous: None,
            q_index: None,
        }
    }
}

impl TournamentKey for Slot {
    #[inline]
    fn later_than(&self, other: &Self) -> bool {
        self.pel.later_than(&other.pel)
    }
}

/// Calendar-queue future event list.
#[derive(Debug, Clone)]
pub struct BoundedPqFel {
    slots: Vec<Slot>,
    lists: Vec<Option<usize>>,
    cbt: Cbt,
    current_index: usize,
    nlists: usize,
    scale: f64,
    list_width: f64,
    pec_time: f64,
    calendar: bool,
    queued: usize,
    overflow_len: usize,
    exception_count: usize,
    n_streams: usize,
}

impl Default for BoundedPqFel {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedPqFel {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            lists: vec![None],
            cbt: Cbt::default(),
            current_index: 0,
            nlists: 1,
            scale: 0.0,
            list_width: f64::INFINITY,
            pec_time: 0.0,
            calendar: false,
            queued: 0,
            overflow_len: 0,
            exception_count: 0,
            n_streams: 0,
        }
    }

    /// Number of calendar buckets (1 when running as a plain tree).
    pub fn nlists(&self) -> usize {
        self.nlists
    }

    /// Buckets per unit time.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Time covered by one full turn of the calendar.
    pub fn list_width(&self) -> f64 {
        self.list_width
    }

    /// Whether the calendar is in use.
    pub fn is_calendar(&self) -> bool {
        self.calendar
    }

    /// Pick `scale` and `nlists` from the spread of the pending event times.
    fn instrument(&mut self) {
        let _span = info_span!("BoundedPqFel::instrument", slots = self.len()).entered();

        if self.pec_time != 0.0 {
            for slot in &mut self.slots {
                slot.pel.stream(self.pec_time);
            }
            self.pec_time = 0.0;
        }

        let mut times: Vec<f64> = self
            .slots
            .iter()
            .skip(1)
            .map(|s| s.pel.next_dt())
            .filter(|t| t.is_finite())
            .collect();
        times.sort_by(f64::total_cmp);

        let (first, last) = match (times.first(), times.last()) {
            (Some(&a), Some(&b)) => (a, b),
            _ => (0.0, 0.0),
        };
        let span = last - first;
        if times.len() < MIN_INSTRUMENTED_EVENTS || span <= 0.0 || last <= 0.0 {
            debug!(
                events = times.len(),
                "too few events to size the calendar, using a plain tree"
            );
            self.calendar = false;
            self.nlists = 1;
            self.scale = 0.0;
            self.list_width = f64::INFINITY;
            return;
        }

        let mut scale = (times.len() - 1) as f64 / span;
        let mut nlists = (2.0 * last * scale).ceil() as usize;
        if nlists > MAX_LISTS {
            nlists = MAX_LISTS;
            scale = nlists as f64 / (2.0 * last);
        }
        self.calendar = true;
        self.nlists = nlists.max(1);
        self.scale = scale;
        self.list_width = self.nlists as f64 / self.scale;
        debug!(
            nlists = self.nlists,
            scale = self.scale,
            list_width = self.list_width,
            "calendar sized"
        );
    }

    /// Re-instrument and re-bucket every slot.
    fn rebuild(&mut self) {
        self.instrument();
        self.current_index = 0;
        self.queued = 0;
        self.overflow_len = 0;
        self.lists = vec![None; self.nlists + 1];
        self.cbt = Cbt::new(self.slots.len().saturating_sub(1));
        for slot in &mut self.slots {
            slot.next = None;
            slot.previous = None;
            slot.q_index = None;
        }
        for p in 1..self.slots.len() {
            self.insert_in_event_q(p);
        }
    }

    fn bucket_for(&self, dt: f64) -> usize {
        let n = self.nlists as i64;
        let cur = self.current_index as i64;
        let boxed = self.scale * dt;
        let mut i = if boxed > i32::MAX as f64 {
            2 * n
        } else {
            boxed as i64
        };
        // Events already in the past stay in the active bucket.
        if i < cur {
            i = cur;
        }
        if i > n - 1 {
            i -= n;
            if i >= cur - 1 {
                i = n;
            }
        }
        i as usize
    }

    fn insert_in_event_q(&mut self, p: usize) {
        let dt = self.slots[p].pel.next_dt();
        if !dt.is_finite() {
            self.slots[p].q_index = None;
            return;
        }
        self.queued += 1;
        let i = if self.calendar {
            self.bucket_for(dt)
        } else {
            self.current_index
        };
        self.slots[p].q_index = Some(i);
        if i == self.current_index {
            self.cbt.insert(p, &self.slots);
        } else {
            let old_first = self.lists[i];
            self.slots[p].previous = None;
            self.slots[p].next = old_first;
            self.lists[i] = Some(p);
            if let Some(f) = old_first {
                self.slots[f].previous = Some(p);
            }
            if i == self.nlists {
                self.overflow_len += 1;
            }
        }
    }

    fn delete_from_event_q(&mut self, p: usize) {
        let Some(q) = self.slots[p].q_index.take() else {
            return;
        };
        self.queued -= 1;
        if self.cbt.contains(p) {
            self.cbt.delete(p, &self.slots);
            return;
        }
        let prev = self.slots[p].previous.take();
        let next = self.slots[p].next.take();
        match prev {
            None => self.lists[q] = next,
            Some(pr) => self.slots[pr].next = next,
        }
        if let Some(nx) = next {
            self.slots[nx].previous = prev;
        }
        if q == self.nlists {
            self.overflow_len -= 1;
        }
    }

    fn process_overflow_list(&mut self) {
        let mut e = self.lists[self.nlists].take();
        self.overflow_len = 0;
        while let Some(p) = e {
            e = self.slots[p].next.take();
            self.slots[p].previous = None;
            self.slots[p].q_index = None;
            self.queued -= 1;
            self.exception_count += 1;
            self.insert_in_event_q(p);
        }
        if self.overflow_len > self.len() / 2 {
            debug!(
                overflow = self.overflow_len,
                "overflow list holds most events, re-instrumenting"
            );
            self.rebuild();
        }
    }

    fn order_next_event(&mut self) {
        if !self.calendar {
            return;
        }
        while self.cbt.is_empty() {
            if self.queued == 0 {
                return;
            }
            if self.queued == self.overflow_len {
                debug!("only overflow events remain, re-instrumenting");
                self.rebuild();
                if !self.calendar {
                    return;
                }
                continue;
            }

            self.current_index += 1;
            if self.current_index == self.nlists {
                trace!(list_width = self.list_width, "calendar wrap");
                self.current_index = 0;
                for slot in &mut self.slots {
                    slot.pel.stream(self.list_width);
                }
                self.pec_time -= self.list_width;
                self.process_overflow_list();
                if !self.calendar {
                    return;
                }
            }

            let mut e = self.lists[self.current_index].take();
            while let Some(p) = e {
                e = self.slots[p].next.take();
                self.slots[p].previous = None;
                self.cbt.insert(p, &self.slots);
            }
        }
    }
}

impl Fel for BoundedPqFel {
    fn name(&self) -> &'static str {
        "BoundedPQ"
    }

    fn resize(&mut self, slots: usize, pel_capacity: usize) {
        *self = Self::new();
        // Index 0 is the tree's null slot.
        self.slots = (0..=slots)
            .map(|p| Slot::new(p.saturating_sub(1), pel_capacity))
            .collect();
        self.cbt = Cbt::new(slots);
    }

    fn len(&self) -> usize {
        self.slots.len().saturating_sub(1)
    }

    fn push(&mut self, event: Event, slot: usize) {
        if !event.dt().is_finite() {
            return;
        }
        let mut event = event;
        event.shift(self.pec_time);
        self.slots[slot + 1].pel.push(event);
    }

    fn update(&mut self, slot: usize) {
        self.delete_from_event_q(slot + 1);
        self.insert_in_event_q(slot + 1);
    }

    fn clear_pel(&mut self, slot: usize) {
        self.slots[slot + 1].pel.clear();
    }

    fn init(&mut self) {
        self.rebuild();
        self.order_next_event();
    }

    fn sort(&mut self) {
        self.order_next_event();
    }

    fn next_event(&self) -> Option<Event> {
        let top = self.cbt.top()?;
        self.slots[top]
            .pel
            .top()
            .map(|e| e.with_dt(e.dt() - self.pec_time))
    }

    fn pop_next_event(&mut self) {
        if let Some(top) = self.cbt.top() {
            self.slots[top].pel.pop();
            self.update(top - 1);
        }
    }

    fn stream(&mut self, dt: f64) {
        self.pec_time += dt;
        if !self.calendar {
            self.n_streams += 1;
            if self.n_streams % STREAM_FREQUENCY == 0 {
                for slot in &mut self.slots {
                    slot.pel.stream(self.pec_time);
                }
                self.pec_time = 0.0;
            }
        }
    }

    fn rescale_times(&mut self, factor: f64) {
        for slot in &mut self.slots {
            slot.pel.rescale_times(factor);
        }
        self.pec_time *= factor;
        if self.calendar {
            self.scale /= factor;
            self.list_width = self.nlists as f64 / self.scale;
        }
    }

    fn slot_events(&self, slot: usize) -> Vec<Event> {
        relative_events(&self.slots[slot + 1].pel, self.pec_time)
    }

    fn exception_count(&self) -> usize {
        self.exception_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventSource, EventType};
    use crate::error::Result;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn local(dt: f64, id: usize) -> Result<Event> {
        Event::new(dt, id, EventSource::Local { id: 0 }, EventType::Wall)
    }

    /// Count the entries currently reachable from the tree and bucket lists.
    fn reachable(fel: &BoundedPqFel) -> usize {
        let mut n = (1..fel.slots.len()).filter(|&p| fel.cbt.contains(p)).count();
        for head in &fel.lists {
            let mut e = *head;
            while let Some(p) = e {
                n += 1;
                e = fel.slots[p].next;
            }
        }
        n
    }

    #[test]
    fn uniform_times_size_the_calendar() -> Result<()> {
        let mut rng = StdRng::seed_from_u64(11);
        let mut fel = BoundedPqFel::new();
        fel.resize(1000, 3);
        for id in 0..1000 {
            fel.push(local(rng.random_range(0.0..100.0), id)?, id);
        }
        fel.init();
        assert!(fel.is_calendar());
        assert!(fel.scale() > 5.0 && fel.scale() < 20.0, "scale {}", fel.scale());
        assert!(fel.list_width() >= 100.0);
        assert_eq!(reachable(&fel), 1000);
        assert_eq!(fel.overflow_len, 0);
        Ok(())
    }

    #[test]
    fn steady_state_overflow_is_rare() -> Result<()> {
        let n = 1000;
        let mut rng = StdRng::seed_from_u64(12);
        let mut fel = BoundedPqFel::new();
        fel.resize(n, 3);
        for id in 0..n {
            fel.push(local(rng.random_range(0.0..100.0), id)?, id);
        }
        fel.init();

        let mut now = 0.0;
        let mut last = f64::NEG_INFINITY;
        let mut pushed = n;
        while now < 3.0 * fel.list_width() {
            fel.sort();
            let next = fel.next_event().expect("queue never drains");
            assert!(next.dt() >= -1e-9);
            now += next.dt();
            assert!(now >= last - 1e-9, "time went backwards: {now} < {last}");
            last = now;
            fel.stream(next.dt());
            fel.pop_next_event();
            fel.push(local(rng.random_range(0.0..100.0), next.particle)?, next.particle);
            fel.update(next.particle);
            pushed += 1;
        }
        assert!(
            (fel.exception_count() as f64) < 0.05 * pushed as f64,
            "{} exceptions for {} events",
            fel.exception_count(),
            pushed
        );
        assert_eq!(reachable(&fel), n);
        Ok(())
    }

    #[test]
    fn far_events_overflow_and_come_back() -> Result<()> {
        let mut fel = BoundedPqFel::new();
        fel.resize(20, 2);
        for id in 0..19 {
            fel.push(local(1.0 + id as f64, id)?, id);
        }
        fel.init();
        assert!(fel.is_calendar());
        fel.push(local(1e4, 19)?, 19);
        fel.update(19);
        assert_eq!(fel.overflow_len, 1);

        let mut order = Vec::new();
        let mut now = 0.0;
        loop {
            fel.sort();
            let Some(next) = fel.next_event() else {
                break;
            };
            now += next.dt();
            fel.stream(next.dt());
            order.push(next.particle);
            fel.pop_next_event();
        }
        assert_eq!(order.len(), 20);
        assert_eq!(order.last(), Some(&19));
        assert!((now - 1e4).abs() < 1e-6, "now {now}");
        Ok(())
    }

    #[test]
    fn negative_times_go_to_the_active_bucket() -> Result<()> {
        let mut fel = BoundedPqFel::new();
        fel.resize(12, 2);
        for id in 0..12 {
            fel.push(local(1.0 + id as f64, id)?, id);
        }
        fel.init();
        fel.push(local(-1e-12, 7)?, 7);
        fel.update(7);
        fel.sort();
        let next = fel.next_event().expect("queued");
        assert_eq!(next.particle, 7);
        assert!(next.dt() < 0.0);
        Ok(())
    }

    #[test]
    fn rescale_keeps_buckets_consistent() -> Result<()> {
        let mut fel = BoundedPqFel::new();
        fel.resize(50, 2);
        for id in 0..50 {
            fel.push(local(0.5 + id as f64, id)?, id);
        }
        fel.init();
        let scale = fel.scale();
        fel.stream(0.25);
        fel.rescale_times(2.0);
        assert!((fel.scale() - scale / 2.0).abs() < 1e-12);
        let mut prev = f64::NEG_INFINITY;
        let mut now = 0.0;
        for _ in 0..50 {
            fel.sort();
            let next = fel.next_event().expect("queued");
            now += next.dt();
            assert!(now >= prev);
            prev = now;
            fel.stream(next.dt());
            fel.pop_next_event();
        }
        // Last event: (49.5 - 0.25) * 2 after the rescale.
        assert!((now - 98.5).abs() < 1e-9, "now {now}");
        Ok(())
    }
}
