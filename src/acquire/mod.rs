// File: src/acquire/mod.rs

pub mod reverse;
pub mod tail;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::debug;

use crate::error::ConfigError;
use crate::parsers::{Grammar, LogRecord};

pub use reverse::{ReverseLines, ReverseScan};
pub use tail::StreamingTail;

/// How new lines are found each cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AcquisitionKind {
    /// Background follower feeding a queue that each cycle drains.
    #[default]
    Tail,
    /// Each cycle reads the file backward until the window or last cycle's newest line.
    Reverse,
}

impl FromStr for AcquisitionKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tail" | "stream" | "streaming" => Ok(AcquisitionKind::Tail),
            "reverse" | "scan" | "reverse_scan" => Ok(AcquisitionKind::Reverse),
            _ => Err(ConfigError::InvalidAcquisition {
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AcquisitionKind::Tail => f.write_str("tail"),
            AcquisitionKind::Reverse => f.write_str("reverse"),
        }
    }
}

/// Line counts for one acquisition pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Raw lines looked at.
    pub lines: usize,
    /// Lines that parsed and were handed on.
    pub records: usize,
    /// Lines the grammar rejected.
    pub rejected: usize,
}

/// Source of the lines appended since the previous cycle.
pub trait Acquire: Send {
    /// Feeds every new, parseable record to `on_record`, bounded by `interval`.
    fn collect(
        &mut self,
        grammar: &Grammar,
        interval: Duration,
        on_record: &mut dyn FnMut(LogRecord),
    ) -> CycleStats;

    /// Stops any background work. Safe to call more than once.
    fn shutdown(&mut self) {}
}

/// Parses one raw line and forwards it; rejected lines are counted and dropped.
pub(crate) fn forward_line(
    grammar: &Grammar,
    line: &str,
    stats: &mut CycleStats,
    on_record: &mut dyn FnMut(LogRecord),
) {
    stats.lines += 1;
    match grammar.parse(line) {
        Ok(record) => {
            debug!(line, "folding");
            stats.records += 1;
            on_record(record);
        }
        Err(err) => {
            debug!(line, %err, "dropping line");
            stats.rejected += 1;
        }
    }
}
