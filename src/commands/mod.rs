//! Command layer
//!
//! Thin wrappers the binary dispatches to. Each command builds the
//! engine handles it needs, runs, prints, and returns an exit code:
//! `0` success, `1` failure, `2` resolution conflicts.

pub mod benchmark;
pub mod resolve;
pub mod update;

pub use benchmark::{BenchOperation, BenchmarkOptions, BenchmarkReport};

use clap::ValueEnum;

/// Success.
pub const EXIT_SUCCESS: i32 = 0;
/// Generic failure.
pub const EXIT_FAILURE: i32 = 1;
/// Resolution finished with conflicts.
pub const EXIT_CONFLICTS: i32 = 2;

/// Output format for machine-consumable command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Aligned human-readable columns.
    Table,
    /// One JSON document.
    Json,
    /// Comma-separated rows with a header.
    Csv,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OutputFormat::Table => "table",
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
        })
    }
}
