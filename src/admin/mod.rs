#![forbid(unsafe_code)]

//! Database administration: statistics, integrity verification and metaroot dumps.

mod error;
mod inspect;
mod options;
mod stats;
mod util;
mod verify;

pub use error::{AdminError, Result};

/// Raw metaroot slot dumps.
pub use inspect::{inspect_database, inspect_metaroots, MetarootReport, SlotReport};

/// Configuration options for opening a database in admin mode.
pub use options::AdminOpenOptions;

/// Statistics collection and reporting.
pub use stats::{
    stats, stats_for, NodePoolStats, ResourceDetail, ResourceStats, StatementStats, StatsReport,
};

/// Database integrity verification.
pub use verify::{
    verify, verify_database, VerifyCounts, VerifyFinding, VerifyLevel, VerifyReport,
    VerifySeverity,
};

pub use util::open_database;
