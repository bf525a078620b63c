//! Scheduler configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Upper bound on cells per axis. Wrapped dilated sums must stay below 1024.
pub const MAX_CELLS_PER_AXIS: usize = 256;

/// Future event list implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum SorterKind {
    /// Calendar queue with a tournament tree over the active bucket.
    #[default]
    BoundedPq,
    /// Tournament tree over every particle.
    Cbt,
}

impl SorterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SorterKind::BoundedPq => "BoundedPQ",
            SorterKind::Cbt => "CBT",
        }
    }
}

impl FromStr for SorterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BoundedPQ" => Ok(SorterKind::BoundedPq),
            "CBT" => Ok(SorterKind::Cbt),
            other => Err(Error::UnknownSorter(other.to_string())),
        }
    }
}

impl TryFrom<String> for SorterKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SorterKind> for String {
    fn from(kind: SorterKind) -> String {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SorterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the scheduler finds candidate pair and local events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum SchedulerKind {
    /// Morton cell grid; only particles in neighbouring cells are tested.
    #[default]
    NeighbourList,
    /// Every particle is tested against every other. No cell grid is built.
    Dumb,
    /// Only system events are queued; particles fly freely between them.
    SystemOnly,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerKind::NeighbourList => "NeighbourList",
            SchedulerKind::Dumb => "Dumb",
            SchedulerKind::SystemOnly => "SystemOnly",
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NeighbourList" => Ok(SchedulerKind::NeighbourList),
            "Dumb" => Ok(SchedulerKind::Dumb),
            "SystemOnly" => Ok(SchedulerKind::SystemOnly),
            other => Err(Error::UnknownScheduler(other.to_string())),
        }
    }
}

impl TryFrom<String> for SchedulerKind {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<SchedulerKind> for String {
    fn from(kind: SchedulerKind) -> String {
        kind.as_str().to_string()
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tunables for the neighbour-list scheduler, its cell grid and its sorter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How candidate events are found.
    pub scheduler: SchedulerKind,
    /// Which future event list to use.
    pub sorter: SorterKind,
    /// Width of the neighbour ring, in cells.
    pub overlink: usize,
    /// Multiplier (>= 1) on the minimum cell width.
    pub oversize: f64,
    /// Fraction of the spare cell width used as overlap between cells.
    pub lambda: f64,
    /// Cap on the number of cells per axis.
    pub max_cells_per_axis: usize,
    /// Events kept per particle before a recalculation is scheduled.
    pub pel_capacity: usize,
    /// Consecutive rejections tolerated before an event is forced through.
    pub rejection_limit: usize,
    /// Lazy streaming is folded into the particles every this many streams.
    pub stream_frequency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::NeighbourList,
            sorter: SorterKind::BoundedPq,
            overlink: 1,
            oversize: 1.0,
            lambda: 0.9,
            max_cells_per_axis: 128,
            pel_capacity: 3,
            rejection_limit: 10,
            stream_frequency: 1000,
        }
    }
}

impl SchedulerConfig {
    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.overlink == 0 {
            return Err(Error::InvalidParam("overlink must be >= 1".into()));
        }
        if !self.oversize.is_finite() || self.oversize < 1.0 {
            return Err(Error::InvalidParam("oversize must be finite and >= 1".into()));
        }
        if !(0.0..1.0).contains(&self.lambda) {
            return Err(Error::InvalidParam("lambda must lie in [0, 1)".into()));
        }
        let required = 2 * self.overlink + 1;
        if self.max_cells_per_axis < required || self.max_cells_per_axis > MAX_CELLS_PER_AXIS {
            return Err(Error::InvalidParam(format!(
                "max_cells_per_axis must lie in [{required}, {MAX_CELLS_PER_AXIS}]"
            )));
        }
        if self.pel_capacity == 0 {
            return Err(Error::InvalidParam("pel_capacity must be >= 1".into()));
        }
        if self.rejection_limit == 0 {
            return Err(Error::InvalidParam("rejection_limit must be >= 1".into()));
        }
        if self.stream_frequency == 0 {
            return Err(Error::InvalidParam("stream_frequency must be >= 1".into()));
        }
        Ok(())
    }
}
