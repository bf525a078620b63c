//! Morton-ordered cell grid used as the neighbour list.
//!
//! Space is cut into a lattice of `cell_count[axis]` cells per axis. Each cell
//! is widened by an overlap so that a particle sitting on a lattice boundary
//! does not bounce between cells. A particle's neighbourhood is the block of
//! `2 * overlink + 1` cells per axis centred on its own cell. The grid is sized
//! so that this block contains every particle within the longest interaction
//! distance.
//!
//! Cells hold intrusive doubly linked lists of particle ids, addressed by the
//! Morton number of the cell coordinate. The lattice always wraps, whatever
//! the boundary condition; open boxes simply never produce pair events across
//! the seam.

use crate::config::SchedulerConfig;
use crate::core::dilated::{DilatedInteger, MortonKey};
use crate::core::dynamics::Dynamics;
use crate::core::particle::DIM;
use crate::core::{Event, EventSource, EventType, Particle};
use crate::error::{Error, Result};
use crate::physics::{Global, GlobalOutcome};
use tracing::{debug, info, info_span};

/// Source id the grid stamps on its events.
pub const CELL_GLOBAL_ID: usize = 0;

/// Per-particle cell membership and list links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartCellData {
    pub cell: MortonKey,
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CellGrid {
    overlink: usize,
    oversize: f64,
    lambda: f64,
    max_cells_per_axis: usize,
    cell_count: [usize; DIM],
    dilated_count: [DilatedInteger; DIM],
    lattice_width: [f64; DIM],
    cell_dimension: [f64; DIM],
    cell_offset: [f64; DIM],
    box_size: [f64; DIM],
    max_int_dist: f64,
    list: Vec<Option<usize>>,
    part_cell_data: Vec<PartCellData>,
}

impl CellGrid {
    /// An empty grid; call [`CellGrid::add_cells`] before use.
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            overlink: config.overlink,
            oversize: config.oversize,
            lambda: config.lambda,
            max_cells_per_axis: config.max_cells_per_axis,
            cell_count: [0; DIM],
            dilated_count: [DilatedInteger::ZERO; DIM],
            lattice_width: [0.0; DIM],
            cell_dimension: [0.0; DIM],
            cell_offset: [0.0; DIM],
            box_size: [0.0; DIM],
            max_int_dist: 0.0,
            list: Vec::new(),
            part_cell_data: Vec::new(),
        }
    }

    /// Size the lattice for interactions reaching `max_int_dist` and insert
    /// every particle into its cell.
    ///
    /// Fails with [`Error::NotEnoughCells`] when an axis cannot fit
    /// `2 * overlink + 1` cells of the required width.
    pub fn add_cells(&mut self, max_int_dist: f64, particles: &[Particle], dynamics: &Dynamics) -> Result<()> {
        let _span = info_span!("CellGrid::add_cells", n = particles.len(), max_int_dist).entered();
        if !(max_int_dist.is_finite() && max_int_dist >= 0.0) {
            return Err(Error::InvalidParam(format!(
                "interaction distance must be finite and >= 0, got {max_int_dist}"
            )));
        }

        let box_size = dynamics.bc().box_size();
        let required = 2 * self.overlink + 1;
        // Without interactions any lattice works: aim for one particle per cell.
        let target_width = if max_int_dist > 0.0 {
            max_int_dist * self.oversize / self.overlink as f64
        } else {
            (dynamics.bc().volume() / particles.len().max(1) as f64).cbrt() * self.oversize
        };

        let mut cell_count = [0usize; DIM];
        for axis in 0..DIM {
            let fit = (box_size[axis] / target_width).floor();
            let count = if fit >= self.max_cells_per_axis as f64 {
                self.max_cells_per_axis
            } else {
                fit as usize
            };
            if count < required {
                if max_int_dist > 0.0 {
                    return Err(Error::NotEnoughCells {
                        axis,
                        count,
                        required,
                    });
                }
                cell_count[axis] = required;
            } else {
                cell_count[axis] = count;
            }
        }

        self.max_int_dist = max_int_dist;
        self.box_size = box_size;
        self.cell_count = cell_count;
        for axis in 0..DIM {
            let w = box_size[axis] / cell_count[axis] as f64;
            // Overlap comes out of the slack between the lattice spacing and
            // the per-cell target, never out of the full interaction range.
            let spare = (w - target_width.min(w)) * self.lambda;
            self.lattice_width[axis] = w;
            self.cell_dimension[axis] = w + spare;
            self.cell_offset[axis] = -0.5 * spare;
            self.dilated_count[axis] = DilatedInteger::try_new(cell_count[axis] as u32)?;
        }

        let supported = self.max_supported_length();
        if supported < max_int_dist {
            return Err(Error::SystemTooSmall {
                supported,
                required: max_int_dist,
            });
        }

        // The far corner cell has the largest Morton number.
        let last = MortonKey::new(cell_count.map(|c| c as u32 - 1));
        self.list = vec![None; last.morton_num() as usize + 1];
        self.part_cell_data = vec![PartCellData::default(); particles.len()];
        for p in particles {
            let cell = self.get_cell_id(&dynamics.current_position(p));
            self.add_to_cell(p.id, cell);
        }

        info!(
            cells = ?self.cell_count,
            lattice_width = ?self.lattice_width,
            cell_dimension = ?self.cell_dimension,
            supported,
            "cell grid built"
        );
        Ok(())
    }

    pub fn cell_count(&self) -> [usize; DIM] {
        self.cell_count
    }

    pub fn lattice_width(&self) -> [f64; DIM] {
        self.lattice_width
    }

    /// Edge lengths of a cell including its overlap.
    pub fn cell_dimension(&self) -> [f64; DIM] {
        self.cell_dimension
    }

    /// Shift of each cell's lower corner from its lattice point.
    pub fn cell_offset(&self) -> [f64; DIM] {
        self.cell_offset
    }

    pub fn overlink(&self) -> usize {
        self.overlink
    }

    /// Largest interaction distance the neighbourhood block is guaranteed to cover.
    pub fn max_supported_length(&self) -> f64 {
        let required = 2 * self.overlink + 1;
        (0..DIM)
            .map(|axis| {
                if self.cell_count[axis] <= required {
                    self.box_size[axis]
                } else {
                    (1 + self.overlink) as f64 * self.lattice_width[axis] - self.cell_dimension[axis]
                }
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Cell containing `pos`, folded into the primary image.
    pub fn get_cell_id(&self, pos: &[f64; DIM]) -> MortonKey {
        let mut coords = [0u32; DIM];
        for axis in 0..DIM {
            let count = self.cell_count[axis] as i64;
            let l = self.box_size[axis];
            let x = pos[axis] - l * (pos[axis] / l).round();
            let c = ((x - self.cell_offset[axis]) / self.lattice_width[axis] + 0.5 * count as f64).floor();
            coords[axis] = (c as i64).rem_euclid(count) as u32;
        }
        MortonKey::new(coords)
    }

    /// Lower corner of `cell` in the primary image.
    pub fn calc_position(&self, cell: MortonKey) -> [f64; DIM] {
        let coords = cell.real_values();
        std::array::from_fn(|axis| {
            coords[axis] as f64 * self.lattice_width[axis] - 0.5 * self.box_size[axis] + self.cell_offset[axis]
        })
    }

    /// Lower corner of the periodic image of `cell` closest to the stored
    /// position of `p`.
    fn calc_position_near(&self, cell: MortonKey, p: &Particle) -> [f64; DIM] {
        let mut origin = self.calc_position(cell);
        for axis in 0..DIM {
            let l = self.box_size[axis];
            let centre = origin[axis] + 0.5 * self.cell_dimension[axis];
            origin[axis] -= l * ((centre - p.r[axis]) / l).round();
        }
        origin
    }

    /// Cell `id` is currently listed in.
    pub fn cell_of(&self, id: usize) -> MortonKey {
        self.part_cell_data[id].cell
    }

    /// Ids listed in `cell`, most recently added first.
    pub fn particles_in_cell(&self, cell: MortonKey) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.list[cell.morton_num() as usize];
        while let Some(id) = cur {
            out.push(id);
            cur = self.part_cell_data[id].next;
        }
        out
    }

    fn add_to_cell(&mut self, id: usize, cell: MortonKey) {
        let idx = cell.morton_num() as usize;
        let head = self.list[idx];
        self.part_cell_data[id] = PartCellData {
            cell,
            prev: None,
            next: head,
        };
        if let Some(h) = head {
            self.part_cell_data[h].prev = Some(id);
        }
        self.list[idx] = Some(id);
    }

    fn remove_from_cell(&mut self, id: usize) {
        let PartCellData { cell, prev, next } = self.part_cell_data[id];
        match prev {
            Some(pv) => self.part_cell_data[pv].next = next,
            None => self.list[cell.morton_num() as usize] = next,
        }
        if let Some(nx) = next {
            self.part_cell_data[nx].prev = prev;
        }
        self.part_cell_data[id].prev = None;
        self.part_cell_data[id].next = None;
    }

    /// `d + k` or `d - k` on `axis`, wrapping modulo the cell count.
    fn shift(&self, d: DilatedInteger, axis: usize, k: usize, forward: bool) -> DilatedInteger {
        let count = self.dilated_count[axis];
        let k = DilatedInteger::new((k % self.cell_count[axis]) as u32);
        if forward {
            let r = d + k;
            if r >= count {
                r - count
            } else {
                r
            }
        } else if d >= k {
            d - k
        } else {
            d + count - k
        }
    }

    fn wrapping_increment(&self, d: &mut DilatedInteger, axis: usize) {
        d.increment();
        if *d == self.dilated_count[axis] {
            *d = DilatedInteger::ZERO;
        }
    }

    /// First cell and walk length of the neighbourhood block along `axis`.
    fn block_start(&self, centre: DilatedInteger, axis: usize) -> (DilatedInteger, usize) {
        let width = 2 * self.overlink + 1;
        if self.cell_count[axis] > width {
            (self.shift(centre, axis, self.overlink, false), width)
        } else {
            // The block would wrap onto itself: walk the whole axis once.
            (DilatedInteger::ZERO, self.cell_count[axis])
        }
    }

    /// Visit every cell of the block starting at `start` with `len` cells per axis.
    fn walk_block(&self, start: MortonKey, len: [usize; DIM], mut f: impl FnMut(usize)) {
        let mut z = start[2];
        for _ in 0..len[2] {
            let mut y = start[1];
            for _ in 0..len[1] {
                let mut x = start[0];
                for _ in 0..len[0] {
                    let mut key = start;
                    key[0] = x;
                    key[1] = y;
                    key[2] = z;
                    let mut cur = self.list[key.morton_num() as usize];
                    while let Some(id) = cur {
                        f(id);
                        cur = self.part_cell_data[id].next;
                    }
                    self.wrapping_increment(&mut x, 0);
                }
                self.wrapping_increment(&mut y, 1);
            }
            self.wrapping_increment(&mut z, 2);
        }
    }

    /// Call `f` with every particle in the neighbourhood block of `part`,
    /// excluding `part` itself.
    pub fn for_each_neighbour(&self, part: usize, mut f: impl FnMut(usize)) {
        let centre = self.part_cell_data[part].cell;
        let mut start = centre;
        let mut len = [0usize; DIM];
        for axis in 0..DIM {
            let (s, l) = self.block_start(centre[axis], axis);
            start[axis] = s;
            len[axis] = l;
        }
        self.walk_block(start, len, |id| {
            if id != part {
                f(id)
            }
        });
    }

    /// Check that every particle is listed exactly once, in the cell it records.
    pub fn check_membership(&self) -> Result<()> {
        let mut seen = vec![0u32; self.part_cell_data.len()];
        for (idx, head) in self.list.iter().enumerate() {
            let mut cur = *head;
            let mut prev = None;
            while let Some(id) = cur {
                let data = self.part_cell_data.get(id).ok_or_else(|| {
                    Error::Invariant(format!("cell {idx} lists unknown particle {id}"))
                })?;
                if data.cell.morton_num() as usize != idx {
                    return Err(Error::Invariant(format!(
                        "particle {id} is listed in cell {idx} but records {:?}",
                        data.cell
                    )));
                }
                if data.prev != prev {
                    return Err(Error::Invariant(format!("broken back link at particle {id}")));
                }
                seen[id] += 1;
                if seen[id] > 1 {
                    return Err(Error::Invariant(format!("particle {id} listed twice")));
                }
                prev = Some(id);
                cur = data.next;
            }
        }
        if let Some(id) = seen.iter().position(|&n| n == 0) {
            return Err(Error::Invariant(format!("particle {id} is in no cell")));
        }
        Ok(())
    }
}

impl Global for CellGrid {
    fn name(&self) -> &str {
        "SchedulerNBList"
    }

    fn get_event(&self, p: &Particle, dynamics: &Dynamics, id: usize) -> Result<Event> {
        let cell = self.part_cell_data[p.id].cell;
        let origin = self.calc_position_near(cell, p);
        let dt = dynamics.square_cell_collision2(p, &origin, &self.cell_dimension) - dynamics.particle_delay(p);
        let source = EventSource::Global { id };
        if dt.is_infinite() {
            return Ok(Event::none(p.id, source));
        }
        Event::new(dt, p.id, source, EventType::Cell)
    }

    /// Move `part` into the cell it is leaving towards and collect the
    /// particles of the newly exposed slab of its neighbourhood.
    fn run_event(
        &mut self,
        particles: &mut [Particle],
        part: usize,
        dynamics: &Dynamics,
    ) -> Result<GlobalOutcome> {
        let p = particles
            .get_mut(part)
            .ok_or_else(|| Error::InvalidParam(format!("no particle {part}")))?;
        dynamics.update_particle(p);

        let old = self.part_cell_data[part].cell;
        let origin = self.calc_position_near(old, p);
        let face = dynamics.square_cell_collision3(p, &origin, &self.cell_dimension)?;
        let axis = (face.unsigned_abs() - 1) as usize;
        let forward = face > 0;

        let mut new = old;
        new[axis] = self.shift(old[axis], axis, 1, forward);
        self.remove_from_cell(part);
        self.add_to_cell(part, new);

        let mut new_neighbours = Vec::new();
        let width = 2 * self.overlink + 1;
        if self.cell_count[axis] > width {
            let mut start = new;
            let mut len = [0usize; DIM];
            for a in 0..DIM {
                if a == axis {
                    start[a] = self.shift(new[a], a, self.overlink, forward);
                    len[a] = 1;
                } else {
                    let (s, l) = self.block_start(new[a], a);
                    start[a] = s;
                    len[a] = l;
                }
            }
            self.walk_block(start, len, |id| {
                if id != part {
                    new_neighbours.push(id)
                }
            });
        }
        debug!(
            particle = part,
            from = ?old,
            to = ?new,
            new_neighbours = new_neighbours.len(),
            "cell transition"
        );

        Ok(GlobalOutcome {
            particle: part,
            kind: EventType::Cell,
            from: old,
            to: new,
            new_neighbours,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::boundary::BoundaryCondition;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn gas(n: usize, l: f64, seed: u64) -> Result<(Vec<Particle>, Dynamics)> {
        let mut rng = StdRng::seed_from_u64(seed);
        let particles = (0..n)
            .map(|id| {
                let r = std::array::from_fn(|_| rng.random_range(-0.5 * l..0.5 * l));
                let v = std::array::from_fn(|_| rng.random_range(-1.0..1.0));
                Particle::new(id, r, v, 1.0)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((particles, Dynamics::new(BoundaryCondition::periodic([l; 3])?, 1000)))
    }

    fn brute_force_neighbours(
        grid: &CellGrid,
        particles: &[Particle],
        dynamics: &Dynamics,
        part: usize,
    ) -> BTreeSet<usize> {
        let r0 = dynamics.current_position(&particles[part]);
        particles
            .iter()
            .filter(|q| q.id != part)
            .filter(|q| {
                let d = dynamics.bc().separation(&r0, &dynamics.current_position(q));
                d.iter().map(|x| x * x).sum::<f64>().sqrt() < grid.max_int_dist
            })
            .map(|q| q.id)
            .collect()
    }

    #[test]
    fn grid_geometry_follows_interaction_range() -> Result<()> {
        let (particles, dynamics) = gas(10, 10.0, 1)?;
        let mut grid = CellGrid::new(&SchedulerConfig::default());
        grid.add_cells(1.0, &particles, &dynamics)?;
        assert_eq!(grid.cell_count(), [10; 3]);
        assert_relative_eq!(grid.lattice_width()[0], 1.0);
        // No spare width: cells are exactly one lattice spacing.
        assert_relative_eq!(grid.cell_dimension()[0], 1.0);
        assert!(grid.max_supported_length() >= 1.0);
        grid.check_membership()
    }

    #[test]
    fn overlinked_cells_are_never_narrower_than_the_lattice() -> Result<()> {
        let (particles, dynamics) = gas(50, 12.0, 7)?;
        // (overlink, cells per axis, per-cell target width)
        for (overlink, count, target) in [(2, 12, 0.975), (3, 18, 0.65)] {
            let cfg = SchedulerConfig {
                overlink,
                oversize: 1.3,
                ..Default::default()
            };
            let mut grid = CellGrid::new(&cfg);
            grid.add_cells(1.5, &particles, &dynamics)?;
            assert_eq!(grid.cell_count(), [count; 3]);

            let w = 12.0 / count as f64;
            let spare = (w - target) * cfg.lambda;
            for axis in 0..DIM {
                assert_relative_eq!(grid.lattice_width()[axis], w, epsilon = 1e-12);
                assert!(grid.cell_dimension()[axis] >= grid.lattice_width()[axis]);
                assert_relative_eq!(grid.cell_dimension()[axis], w + spare, epsilon = 1e-12);
                assert_relative_eq!(grid.cell_offset()[axis], -0.5 * spare, epsilon = 1e-12);
            }
            assert!(grid.max_supported_length() >= 1.5, "overlink {overlink}");
            for p in &particles {
                let dt = grid.get_event(p, &dynamics, CELL_GLOBAL_ID)?.dt();
                assert!(dt >= 0.0, "overlink {overlink}: cell event dt {dt}");
            }
            grid.check_membership()?;
        }
        Ok(())
    }

    #[test]
    fn list_is_sized_by_the_far_corner() -> Result<()> {
        let (particles, dynamics) = gas(4, 10.0, 8)?;
        let mut grid = CellGrid::new(&SchedulerConfig::default());
        grid.add_cells(1.0, &particles, &dynamics)?;
        let corner = MortonKey::new([9, 9, 9]);
        assert_eq!(grid.list.len(), corner.morton_num() as usize + 1);
        assert!(grid.list.len() < 16 * 16 * 16);
        grid.check_membership()
    }

    #[test]
    fn too_few_cells_is_fatal() -> Result<()> {
        let (particles, dynamics) = gas(4, 5.0, 2)?;
        let mut grid = CellGrid::new(&SchedulerConfig::default());
        let err = grid.add_cells(2.0, &particles, &dynamics).unwrap_err();
        assert!(matches!(
            err,
            Error::NotEnoughCells {
                count: 2,
                required: 3,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn no_interactions_uses_unit_occupancy() -> Result<()> {
        let (particles, dynamics) = gas(8, 2.0, 3)?;
        let mut grid = CellGrid::new(&SchedulerConfig::default());
        grid.add_cells(0.0, &particles, &dynamics)?;
        assert_eq!(grid.cell_count(), [3; 3]);
        grid.check_membership()
    }

    #[test]
    fn cell_ids_wrap_periodically() -> Result<()> {
        let (particles, dynamics) = gas(1, 10.0, 4)?;
        let mut grid = CellGrid::new(&SchedulerConfig::default());
        grid.add_cells(1.0, &particles, &dynamics)?;
        let inside = grid.get_cell_id(&[-4.99, 0.01, 4.99]);
        assert_eq!(inside.real_values(), [0, 5, 9]);
        let image = grid.get_cell_id(&[5.01, 10.01, -5.01]);
        assert_eq!(image.real_values(), [0, 5, 9]);
        let corner = grid.calc_position(inside);
        assert_relative_eq!(corner[0], -5.0);
        assert_relative_eq!(corner[2], 4.0);
        Ok(())
    }

    #[test]
    fn neighbourhood_covers_interaction_range() -> Result<()> {
        let (particles, dynamics) = gas(300, 12.0, 5)?;
        for overlink in 1..=3 {
            let cfg = SchedulerConfig {
                overlink,
                oversize: 1.3,
                ..Default::default()
            };
            let mut grid = CellGrid::new(&cfg);
            grid.add_cells(1.5, &particles, &dynamics)?;
            for part in 0..particles.len() {
                let mut found = BTreeSet::new();
                grid.for_each_neighbour(part, |id| {
                    assert!(found.insert(id), "{id} visited twice");
                });
                let needed = brute_force_neighbours(&grid, &particles, &dynamics, part);
                assert!(
                    needed.is_subset(&found),
                    "overlink {overlink}: particle {part} misses neighbours"
                );
            }
        }
        Ok(())
    }

    #[test]
    fn transitions_keep_membership_and_expose_new_slab() -> Result<()> {
        for overlink in 1..=2 {
            transitions_with_overlink(overlink)?;
        }
        Ok(())
    }

    fn transitions_with_overlink(overlink: usize) -> Result<()> {
        let (mut particles, mut dynamics) = gas(200, 10.0, 6)?;
        let cfg = SchedulerConfig {
            overlink,
            oversize: 1.5,
            ..Default::default()
        };
        let mut grid = CellGrid::new(&cfg);
        grid.add_cells(1.0, &particles, &dynamics)?;

        for _ in 0..500 {
            // Earliest cell crossing of the whole system.
            let (part, dt) = particles
                .iter()
                .map(|p| Ok((p.id, grid.get_event(p, &dynamics, CELL_GLOBAL_ID)?.dt())))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .ok_or_else(|| Error::Invariant("no particles".into()))?;
            assert!(dt >= -1e-9);
            dynamics.stream(dt, &mut particles);

            let mut before = BTreeSet::new();
            grid.for_each_neighbour(part, |id| {
                before.insert(id);
            });
            let out = grid.run_event(&mut particles, part, &dynamics)?;
            let mut after = BTreeSet::new();
            grid.for_each_neighbour(part, |id| {
                after.insert(id);
            });

            let fresh: BTreeSet<usize> = out.new_neighbours.iter().copied().collect();
            assert_eq!(fresh.len(), out.new_neighbours.len());
            let expected: BTreeSet<usize> = after.difference(&before).copied().collect();
            assert_eq!(fresh, expected);
            assert_eq!(grid.cell_of(part), out.to);
            // The moved particle sits inside the widened box of its new cell.
            let origin = grid.calc_position_near(out.to, &particles[part]);
            for axis in 0..DIM {
                let rel = particles[part].r[axis] - origin[axis];
                assert!(rel > -1e-9 && rel < grid.cell_dimension()[axis] + 1e-9);
            }
        }
        grid.check_membership()
    }
}
