use crate::error::{Error, Result};

/// Fixed spatial dimension (3D).
pub const DIM: usize = 3;

/// A point particle. Its shape is defined by the interactions acting on it.
///
/// `r` is valid as of the particle's last update by the dynamics; between
/// updates the true position is `r + v * particle_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Dense index `0..N`, equal to the particle's slot in the particle array.
    pub id: usize,
    pub r: [f64; DIM],
    pub v: [f64; DIM],
    pub mass: f64,
    /// Lazy-streaming offset; see [`crate::core::dynamics::Dynamics::particle_delay`].
    pub pec_time: f64,
}

fn finite(what: &str, x: &[f64; DIM]) -> Result<()> {
    if x.iter().all(|c| c.is_finite()) {
        Ok(())
    } else {
        Err(Error::InvalidParam(format!("{what} must be finite, got {x:?}")))
    }
}

impl Particle {
    /// Errors with `Error::InvalidParam` on a non-positive mass or a
    /// non-finite component.
    pub fn new(id: usize, r: [f64; DIM], v: [f64; DIM], mass: f64) -> Result<Self> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(Error::InvalidParam("mass must be finite and > 0".into()));
        }
        finite("position", &r)?;
        finite("velocity", &v)?;
        Ok(Self {
            id,
            r,
            v,
            mass,
            pec_time: 0.0,
        })
    }

    #[inline]
    pub fn kinetic_energy(&self) -> f64 {
        0.5 * self.mass * self.v.iter().map(|c| c * c).sum::<f64>()
    }

    /// Overwrite the stored position. The caller must bring the particle up to
    /// date first, or the lazy offset applies on top of the new value.
    pub fn set_position(&mut self, r: [f64; DIM]) -> Result<()> {
        finite("position", &r)?;
        self.r = r;
        Ok(())
    }

    pub fn set_velocity(&mut self, v: [f64; DIM]) -> Result<()> {
        finite("velocity", &v)?;
        self.v = v;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_particle_validates() {
        assert!(Particle::new(0, [0.0; DIM], [0.0; DIM], 1.0).is_ok());
        assert!(Particle::new(0, [0.0; DIM], [0.0; DIM], 0.0).is_err());
        assert!(Particle::new(0, [f64::NAN, 0.0, 0.0], [0.0; DIM], 1.0).is_err());
        assert!(Particle::new(0, [0.0; DIM], [0.0, f64::INFINITY, 0.0], 1.0).is_err());
    }

    #[test]
    fn kinetic_energy_is_half_m_v2() -> Result<()> {
        let p = Particle::new(3, [1.0, 2.0, 3.0], [1.0, -2.0, 2.0], 2.0)?;
        assert!((p.kinetic_energy() - 9.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn setters_reject_non_finite() -> Result<()> {
        let mut p = Particle::new(0, [0.0; DIM], [0.0; DIM], 1.0)?;
        assert!(p.set_position([f64::NAN, 0.0, 0.0]).is_err());
        assert!(p.set_velocity([0.0, 0.0, f64::NEG_INFINITY]).is_err());
        p.set_velocity([1.0, 0.0, 0.0])?;
        assert_eq!(p.v, [1.0, 0.0, 0.0]);
        Ok(())
    }
}
