use thiserror::Error;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the event-driven core.
///
/// Construction-time configuration problems, fatal scheduler invariant breaks and
/// numerical pathologies all surface through this enum. Stale or superseded events
/// are never reported here; the scheduler retries them internally.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid user or API parameter.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// The requested event sorter is not one this build knows about.
    #[error("unknown event sorter type \"{0}\" (expected \"BoundedPQ\" or \"CBT\")")]
    UnknownSorter(String),

    /// The requested scheduler is not one this build knows about.
    #[error("unknown scheduler type \"{0}\" (expected \"NeighbourList\", \"Dumb\" or \"SystemOnly\")")]
    UnknownScheduler(String),

    /// The cell lattice cannot hold a full `2*overlink+1` neighbourhood on some axis.
    #[error(
        "not enough cells on axis {axis}: {count} < {required}, the system is too small for the interaction range"
    )]
    NotEnoughCells {
        axis: usize,
        count: usize,
        required: usize,
    },

    /// The cell grid cannot guarantee neighbourhoods for the longest interaction.
    #[error(
        "system size is too small to support the range of interactions: supported {supported}, required {required}"
    )]
    SystemTooSmall { supported: f64, required: f64 },

    /// A NaN propagated into the event queue; this is always a bug upstream.
    #[error("NaN event time for particle {particle} ({kind}) at system time {time}")]
    NanEventTime {
        particle: usize,
        kind: String,
        time: f64,
    },

    /// A NONE event reached the front of the future event list.
    #[error("no future event available: NONE event for particle {particle} at system time {time}")]
    NoneEventAtFront { particle: usize, time: f64 },

    /// Internal bookkeeping inconsistency (cell lists, sorter slots, counters).
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Numerical or geometric issue (e.g., degenerate contact normal).
    #[error("numerical error: {0}")]
    MathError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_informative() {
        let e = Error::InvalidParam("diameter must be > 0".to_string());
        let msg = format!("{e}");
        assert!(msg.contains("invalid parameter"));
        assert!(msg.contains("diameter"));
    }

    #[test]
    fn cell_errors_name_the_axis() {
        let e = Error::NotEnoughCells {
            axis: 2,
            count: 2,
            required: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("axis 2"));
        assert!(msg.contains("2 < 3"));
    }

    #[test]
    fn unknown_names_list_the_accepted_ones() {
        let msg = Error::UnknownScheduler("Complex".into()).to_string();
        assert!(msg.contains("\"Complex\""));
        assert!(msg.contains("NeighbourList") && msg.contains("SystemOnly"));
    }

    #[test]
    fn fatal_event_errors_carry_context() {
        let e = Error::NanEventTime {
            particle: 7,
            kind: "Interaction".into(),
            time: 1.5,
        };
        let msg = e.to_string();
        assert!(msg.contains("particle 7"));
        assert!(msg.contains("1.5"));
    }
}
