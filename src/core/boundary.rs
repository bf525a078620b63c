//! Boundary conditions for a box centred on the origin.

use crate::core::particle::DIM;
use crate::error::{Error, Result};

/// Boundary condition applied to separation vectors and positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundaryCondition {
    /// Periodic images of a box spanning `[-L/2, L/2)` on each axis.
    Periodic { box_size: [f64; DIM] },
    /// Open space; `box_size` only bounds the cell lattice.
    Open { box_size: [f64; DIM] },
}

impl BoundaryCondition {
    /// Periodic box with edge lengths `box_size`.
    pub fn periodic(box_size: [f64; DIM]) -> Result<Self> {
        validate_box(&box_size)?;
        Ok(Self::Periodic { box_size })
    }

    /// Non-periodic box with edge lengths `box_size`.
    pub fn open(box_size: [f64; DIM]) -> Result<Self> {
        validate_box(&box_size)?;
        Ok(Self::Open { box_size })
    }

    /// Primary cell edge lengths.
    #[inline]
    pub fn box_size(&self) -> [f64; DIM] {
        match *self {
            Self::Periodic { box_size } | Self::Open { box_size } => box_size,
        }
    }

    /// Box volume.
    pub fn volume(&self) -> f64 {
        self.box_size().iter().product()
    }

    /// Map a vector onto its minimum image (periodic) or leave it untouched (open).
    #[inline]
    pub fn apply(&self, r: &mut [f64; DIM]) {
        if let Self::Periodic { box_size } = self {
            for (x, l) in r.iter_mut().zip(box_size) {
                *x -= l * (*x / l).round();
            }
        }
    }

    /// Minimum-image separation `a - b`.
    #[inline]
    pub fn separation(&self, a: &[f64; DIM], b: &[f64; DIM]) -> [f64; DIM] {
        let mut r = [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
        self.apply(&mut r);
        r
    }
}

fn validate_box(box_size: &[f64; DIM]) -> Result<()> {
    if !box_size.iter().all(|&l| l.is_finite() && l > 0.0) {
        return Err(Error::InvalidParam(
            "box_size components must be finite and > 0".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn periodic_wraps_to_minimum_image() -> Result<()> {
        let bc = BoundaryCondition::periodic([10.0, 10.0, 4.0])?;
        let mut r = [6.0, -7.0, 1.0];
        bc.apply(&mut r);
        assert!((r[0] + 4.0).abs() < 1e-12);
        assert!((r[1] - 3.0).abs() < 1e-12);
        assert!((r[2] - 1.0).abs() < 1e-12);
        let d = bc.separation(&[4.5, 0.0, 0.0], &[-4.5, 0.0, 0.0]);
        assert!((d[0] + 1.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn open_is_identity() -> Result<()> {
        let bc = BoundaryCondition::open([10.0; DIM])?;
        let mut r = [60.0, -70.0, 1.0];
        bc.apply(&mut r);
        assert_eq!(r, [60.0, -70.0, 1.0]);
        assert!((bc.volume() - 1000.0).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn rejects_degenerate_box() {
        assert!(BoundaryCondition::periodic([0.0, 1.0, 1.0]).is_err());
        assert!(BoundaryCondition::open([1.0, f64::NAN, 1.0]).is_err());
    }
}
