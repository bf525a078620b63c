//! Newtonian (ballistic) dynamics with lazy particle streaming.
//!
//! Particles are not moved on every event. The dynamics keeps a global peculiar
//! time `part_pec_time` that grows as the system streams; each particle stores its
//! own `pec_time` so that `part_pec_time + p.pec_time` is how far behind the system
//! clock the particle's stored position is. A particle is brought up to date only
//! when an event touches it.

use crate::core::boundary::BoundaryCondition;
use crate::core::event::EventType;
use crate::core::particle::{Particle, DIM};
use crate::error::{Error, Result};

#[inline]
pub(crate) fn dot(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn sub(a: &[f64; DIM], b: &[f64; DIM]) -> [f64; DIM] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Mutable references to two distinct particles.
pub(crate) fn pair_mut(
    particles: &mut [Particle],
    i: usize,
    j: usize,
) -> Result<(&mut Particle, &mut Particle)> {
    if i == j || i >= particles.len() || j >= particles.len() {
        return Err(Error::InvalidParam(format!(
            "invalid particle pair ({i}, {j}) for {} particles",
            particles.len()
        )));
    }
    if i < j {
        let (lo, hi) = particles.split_at_mut(j);
        Ok((&mut lo[i], &mut hi[0]))
    } else {
        let (lo, hi) = particles.split_at_mut(i);
        Ok((&mut hi[0], &mut lo[j]))
    }
}

/// Time for two spheres approaching along `r`, `v` (relative position and
/// velocity) to reach separation `d`. Infinite if they never do.
pub fn sphere_in_root(r: &[f64; DIM], v: &[f64; DIM], d: f64) -> f64 {
    let b = dot(r, v);
    if b >= 0.0 {
        return f64::INFINITY;
    }
    let c = dot(r, r) - d * d;
    if c <= 0.0 {
        return 0.0;
    }
    let a = dot(v, v);
    let arg = b * b - a * c;
    if arg < 0.0 {
        return f64::INFINITY;
    }
    c / (arg.sqrt() - b)
}

/// Time for two spheres inside separation `d` to move apart to exactly `d`.
pub fn sphere_out_root(r: &[f64; DIM], v: &[f64; DIM], d: f64) -> f64 {
    let a = dot(v, v);
    if a == 0.0 {
        return f64::INFINITY;
    }
    let b = dot(r, v);
    let c = dot(r, r) - d * d;
    if c >= 0.0 && b >= 0.0 {
        return 0.0;
    }
    let root = (b * b - a * c).max(0.0).sqrt();
    let t = if b < 0.0 {
        (root - b) / a
    } else if b + root > 0.0 {
        -c / (b + root)
    } else {
        0.0
    };
    t.max(0.0)
}

/// Time for a point at `r` (relative to a plane through the origin with unit
/// normal `n`) to come within `d` of the plane from the normal side.
pub fn plane_root(r: &[f64; DIM], v: &[f64; DIM], n: &[f64; DIM], d: f64) -> f64 {
    let rvdot = dot(v, n);
    if rvdot >= 0.0 {
        return f64::INFINITY;
    }
    let dist = dot(r, n) - d;
    if dist <= 0.0 {
        return 0.0;
    }
    -dist / rvdot
}

/// Energy bookkeeping for a two-particle event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairEventData {
    pub particle1: usize,
    pub particle2: usize,
    /// Type actually executed (a well exit may become a bounce).
    pub kind: EventType,
    /// Impulse applied to particle 2 (particle 1 receives the negative).
    pub impulse: [f64; DIM],
    /// Change in total kinetic energy of the pair.
    pub delta_ke: f64,
    /// Change in potential energy of the pair.
    pub delta_u: f64,
}

/// Energy bookkeeping for a single-particle event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleEventData {
    pub particle: usize,
    pub kind: EventType,
    pub delta_ke: f64,
}

/// Ballistic dynamics collaborator.
#[derive(Debug, Clone)]
pub struct Dynamics {
    bc: BoundaryCondition,
    part_pec_time: f64,
    stream_count: usize,
    stream_frequency: usize,
}

impl Dynamics {
    /// Create dynamics for boundary `bc`, folding lazy streaming into the
    /// particles every `stream_frequency` calls to [`Dynamics::stream`].
    pub fn new(bc: BoundaryCondition, stream_frequency: usize) -> Self {
        Self {
            bc,
            part_pec_time: 0.0,
            stream_count: 0,
            stream_frequency: stream_frequency.max(1),
        }
    }

    /// Boundary condition in use.
    #[inline]
    pub fn bc(&self) -> &BoundaryCondition {
        &self.bc
    }

    /// How far behind the system clock a particle's stored state is.
    #[inline]
    pub fn particle_delay(&self, p: &Particle) -> f64 {
        self.part_pec_time + p.pec_time
    }

    /// True when the particle's stored state is current.
    #[inline]
    pub fn is_up_to_date(&self, p: &Particle) -> bool {
        self.particle_delay(p) == 0.0
    }

    /// Stream one particle to the current system time.
    #[inline]
    pub fn update_particle(&self, p: &mut Particle) {
        let dt = self.particle_delay(p);
        if dt != 0.0 {
            for k in 0..DIM {
                p.r[k] += p.v[k] * dt;
            }
        }
        p.pec_time = -self.part_pec_time;
    }

    /// Stream two particles to the current system time.
    pub fn update_particle_pair(&self, particles: &mut [Particle], i: usize, j: usize) -> Result<()> {
        let (p1, p2) = pair_mut(particles, i, j)?;
        self.update_particle(p1);
        self.update_particle(p2);
        Ok(())
    }

    /// Stream every particle to the current system time.
    pub fn update_all(&self, particles: &mut [Particle]) {
        for p in particles.iter_mut() {
            self.update_particle(p);
        }
    }

    /// Advance the dynamics clock by `dt` without touching particle positions.
    pub fn stream(&mut self, dt: f64, particles: &mut [Particle]) {
        self.part_pec_time += dt;
        self.stream_count += 1;
        if self.stream_count >= self.stream_frequency {
            for p in particles.iter_mut() {
                p.pec_time += self.part_pec_time;
            }
            self.part_pec_time = 0.0;
            self.stream_count = 0;
        }
    }

    /// Position of `p` at the current system time, without updating it.
    pub fn current_position(&self, p: &Particle) -> [f64; DIM] {
        let dt = self.particle_delay(p);
        [
            p.r[0] + p.v[0] * dt,
            p.r[1] + p.v[1] * dt,
            p.r[2] + p.v[2] * dt,
        ]
    }

    /// Minimum-image relative position and velocity of two up-to-date particles.
    #[inline]
    pub fn relative(&self, p1: &Particle, p2: &Particle) -> ([f64; DIM], [f64; DIM]) {
        (self.bc.separation(&p1.r, &p2.r), sub(&p1.v, &p2.v))
    }

    /// Time for `p` (stored, possibly stale state) to leave the axis-aligned box
    /// starting at `origin` with edge lengths `width`.
    pub fn square_cell_collision2(&self, p: &Particle, origin: &[f64; DIM], width: &[f64; DIM]) -> f64 {
        let mut ret = f64::INFINITY;
        for k in 0..DIM {
            let v = p.v[k];
            if v == 0.0 {
                continue;
            }
            let rpos = p.r[k] - origin[k];
            let t = if v < 0.0 {
                -rpos / v
            } else {
                (width[k] - rpos) / v
            };
            if t < ret {
                ret = t;
            }
        }
        ret
    }

    /// Face crossed first when leaving the box: `±(axis + 1)` with the sign of
    /// the velocity along that axis.
    pub fn square_cell_collision3(
        &self,
        p: &Particle,
        origin: &[f64; DIM],
        width: &[f64; DIM],
    ) -> Result<i32> {
        let mut best = f64::INFINITY;
        let mut face = 0i32;
        for k in 0..DIM {
            let v = p.v[k];
            if v == 0.0 {
                continue;
            }
            let rpos = p.r[k] - origin[k];
            let t = if v < 0.0 {
                -rpos / v
            } else {
                (width[k] - rpos) / v
            };
            if t < best || face == 0 {
                best = t;
                face = if v < 0.0 { -(k as i32 + 1) } else { k as i32 + 1 };
            }
        }
        if face == 0 {
            return Err(Error::MathError(format!(
                "particle {} has zero velocity and cannot leave its cell",
                p.id
            )));
        }
        Ok(face)
    }

    /// Smooth (frictionless) sphere collision with restitution `elasticity`.
    /// Both particles must be up to date.
    pub fn smooth_spheres_collision(
        &self,
        particles: &mut [Particle],
        i: usize,
        j: usize,
        elasticity: f64,
    ) -> Result<PairEventData> {
        let (p1, p2) = pair_mut(particles, i, j)?;
        let (rij, vij) = self.relative(p1, p2);
        let r2 = dot(&rij, &rij);
        if r2 <= 0.0 {
            return Err(Error::MathError(format!(
                "degenerate contact normal in collision of {i} and {j}"
            )));
        }
        let mu = p1.mass * p2.mass / (p1.mass + p2.mass);
        let rvdot = dot(&rij, &vij);
        let factor = (1.0 + elasticity) * mu * rvdot / r2;
        let impulse = rij.map(|x| x * factor);
        Ok(apply_impulse(p1, p2, impulse, EventType::Core, 0.0))
    }

    /// Cross a potential step that changes the pair's kinetic energy by
    /// `delta_ke`. If the radial kinetic energy cannot pay for a negative
    /// `delta_ke`, the pair bounces instead and `kind` becomes `Bounce`.
    pub fn sphere_well_event(
        &self,
        particles: &mut [Particle],
        i: usize,
        j: usize,
        delta_ke: f64,
        kind: EventType,
    ) -> Result<PairEventData> {
        let (p1, p2) = pair_mut(particles, i, j)?;
        let (rij, vij) = self.relative(p1, p2);
        let r2 = dot(&rij, &rij);
        if r2 <= 0.0 {
            return Err(Error::MathError(format!(
                "degenerate well normal for pair {i} and {j}"
            )));
        }
        let mu = p1.mass * p2.mass / (p1.mass + p2.mass);
        let rvdot = dot(&rij, &vij);
        let sqrt_arg = rvdot * rvdot + 2.0 * r2 * delta_ke / mu;

        if delta_ke < 0.0 && sqrt_arg < 0.0 {
            let factor = 2.0 * mu * rvdot / r2;
            let impulse = rij.map(|x| x * factor);
            return Ok(apply_impulse(p1, p2, impulse, EventType::Bounce, 0.0));
        }
        if delta_ke == 0.0 {
            return Ok(apply_impulse(p1, p2, [0.0; DIM], kind, 0.0));
        }
        let root = sqrt_arg.sqrt();
        let factor = if rvdot < 0.0 {
            2.0 * delta_ke / (root - rvdot)
        } else {
            -2.0 * delta_ke / (rvdot + root)
        };
        let impulse = rij.map(|x| x * factor);
        Ok(apply_impulse(p1, p2, impulse, kind, -delta_ke))
    }

    /// Reflect an up-to-date particle off a plane with unit normal `n`.
    pub fn wall_collision(&self, p: &mut Particle, n: &[f64; DIM], elasticity: f64) -> ParticleEventData {
        let ke0 = p.kinetic_energy();
        let vn = dot(&p.v, n);
        for k in 0..DIM {
            p.v[k] -= (1.0 + elasticity) * vn * n[k];
        }
        ParticleEventData {
            particle: p.id,
            kind: EventType::Wall,
            delta_ke: p.kinetic_energy() - ke0,
        }
    }
}

fn apply_impulse(
    p1: &mut Particle,
    p2: &mut Particle,
    impulse: [f64; DIM],
    kind: EventType,
    delta_u: f64,
) -> PairEventData {
    let ke0 = p1.kinetic_energy() + p2.kinetic_energy();
    for k in 0..DIM {
        p1.v[k] -= impulse[k] / p1.mass;
        p2.v[k] += impulse[k] / p2.mass;
    }
    PairEventData {
        particle1: p1.id,
        particle2: p2.id,
        kind,
        impulse,
        delta_ke: p1.kinetic_energy() + p2.kinetic_energy() - ke0,
        delta_u,
    }
}
