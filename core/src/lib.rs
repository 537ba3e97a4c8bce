//! Core types shared by the portwatch engine: snapshots, the diff engine,
//! the error taxonomy and the history store seam.

pub mod diff;
pub mod error;
pub mod hostlock;
pub mod model;
pub mod store;

pub use diff::diff;
pub use error::{Error, FailureKind, ParseError, ProbeError, Result};
pub use hostlock::HostLocks;
pub use model::*;
pub use store::HistoryStore;

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
