//! Dilated integers and Morton keys for 3D cell addressing.
//!
//! A [`DilatedInteger`] stores the *dilated* bit pattern of a 10-bit lattice
//! index: bit `k` of the logical value lives at bit `3k`. Three of them, shifted
//! by 0, 1 and 2 bits, interleave into a 30-bit Morton (Z-order) code.
//!
//! All arithmetic stays inside the integer's own bit-plane. Carries are forced
//! through the gaps by OR-ing in the complement of the plane mask before adding,
//! and the result is re-masked, so neighbouring planes of a [`MortonKey`] are
//! never touched. Values wrap modulo `2^10` on overflow.

use crate::error::{Error, Result};
use std::fmt;
use std::ops::{Add, Index, IndexMut, Sub};

/// Number of logical bits per axis.
pub const DILATED_BITS: u32 = 10;

/// Largest logical value representable on one axis.
pub const DILATED_MAX_REAL: u32 = (1 << DILATED_BITS) - 1;

/// Bit-plane mask of a dilated value (every third bit, 10 bits).
pub const DILATED_MASK: u32 = 0x0924_9249;

#[inline]
fn dilate_3(r: u32) -> u32 {
    let mut r = r.wrapping_mul(0x0001_0001) & 0xFF00_00FF;
    r = r.wrapping_mul(0x0000_0101) & 0x0F00_F00F;
    r = r.wrapping_mul(0x0000_0011) & 0xC30C_30C3;
    r.wrapping_mul(0x0000_0005) & 0x4924_9249
}

#[inline]
fn undilate_3(t: u32) -> u32 {
    let mut t = t.wrapping_mul(0x0000_0015) & 0x0E07_0381;
    t = t.wrapping_mul(0x0000_1041) & 0x0FF8_0001;
    t = t.wrapping_mul(0x0004_0001) & 0x0FFC_0000;
    t >> 18
}

/// One axis of a 3D Morton code, stored in dilated form.
///
/// Ordering compares dilated patterns, which preserves the ordering of the
/// logical values.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DilatedInteger {
    value: u32,
}

impl DilatedInteger {
    /// Zero on this axis.
    pub const ZERO: Self = Self { value: 0 };

    /// Largest dilated value (logical `2^10 - 1`).
    pub const MAX: Self = Self {
        value: DILATED_MASK,
    };

    /// Dilate a logical lattice index.
    ///
    /// Bits above [`DILATED_BITS`] are discarded in release builds; debug builds
    /// assert the value is in range. Use [`DilatedInteger::try_new`] when the
    /// value comes from outside the crate.
    #[inline]
    pub fn new(v: u32) -> Self {
        debug_assert!(
            v <= DILATED_MAX_REAL,
            "dilated integer {v} exceeds {DILATED_MAX_REAL}"
        );
        Self {
            value: dilate_3(v & DILATED_MAX_REAL),
        }
    }

    /// Checked construction from a logical index.
    pub fn try_new(v: u32) -> Result<Self> {
        if v > DILATED_MAX_REAL {
            return Err(Error::InvalidParam(format!(
                "lattice index {v} does not fit in {DILATED_BITS} dilated bits"
            )));
        }
        Ok(Self::new(v))
    }

    /// Wrap an already-dilated bit pattern (masked to the plane).
    #[inline]
    pub fn from_dilated(raw: u32) -> Self {
        Self {
            value: raw & DILATED_MASK,
        }
    }

    /// The logical (undilated) value.
    #[inline]
    pub fn real_value(self) -> u32 {
        undilate_3(self.value)
    }

    /// The stored dilated bit pattern.
    #[inline]
    pub fn dilated_value(self) -> u32 {
        self.value
    }

    /// Step to the next value on this plane, wrapping past [`Self::MAX`] to zero.
    #[inline]
    pub fn increment(&mut self) {
        self.value = self.value.wrapping_sub(DILATED_MASK) & DILATED_MASK;
    }

    /// Step to the previous value on this plane, wrapping zero to [`Self::MAX`].
    #[inline]
    pub fn decrement(&mut self) {
        self.value = self.value.wrapping_sub(1) & DILATED_MASK;
    }
}

impl Add for DilatedInteger {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self {
            value: self
                .value
                .wrapping_add(!DILATED_MASK)
                .wrapping_add(rhs.value)
                & DILATED_MASK,
        }
    }
}

impl Sub for DilatedInteger {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self {
            value: self.value.wrapping_sub(rhs.value) & DILATED_MASK,
        }
    }
}

impl fmt::Debug for DilatedInteger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dilated({})", self.real_value())
    }
}

/// A 3D lattice coordinate whose axes interleave into one Morton number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MortonKey {
    data: [DilatedInteger; 3],
}

impl MortonKey {
    /// Build from logical per-axis lattice indices.
    pub fn new(coords: [u32; 3]) -> Self {
        Self {
            data: coords.map(DilatedInteger::new),
        }
    }

    /// Split a Morton number back into its three axes.
    pub fn from_morton(morton: u32) -> Self {
        Self {
            data: [0, 1, 2].map(|i| DilatedInteger::from_dilated(morton >> i)),
        }
    }

    /// Interleaved Morton number of this coordinate.
    #[inline]
    pub fn morton_num(&self) -> u32 {
        self.data[0].dilated_value()
            + (self.data[1].dilated_value() << 1)
            + (self.data[2].dilated_value() << 2)
    }

    /// Logical per-axis indices.
    pub fn real_values(&self) -> [u32; 3] {
        self.data.map(DilatedInteger::real_value)
    }
}

impl Index<usize> for MortonKey {
    type Output = DilatedInteger;

    #[inline]
    fn index(&self, axis: usize) -> &DilatedInteger {
        &self.data[axis]
    }
}

impl IndexMut<usize> for MortonKey {
    #[inline]
    fn index_mut(&mut self, axis: usize) -> &mut DilatedInteger {
        &mut self.data[axis]
    }
}

impl fmt::Debug for MortonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.real_values();
        write!(f, "MortonKey({x}, {y}, {z} | {})", self.morton_num())
    }
}
