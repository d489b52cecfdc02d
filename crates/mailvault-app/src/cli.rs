//! Command-line surface of the `mailvault` binary.

use clap::{Parser, Subcommand};

/// Remote mail backup orchestration.
#[derive(Debug, Parser)]
#[command(name = "mailvault", version, about = "Remote mail backup orchestration")]
pub struct Cli {
    /// Mode to run in.
    #[command(subcommand)]
    pub command: Command,
}

/// Process modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the daily scheduler and the HTTP trigger until interrupted.
    Serve,
    /// Run one backup now, print its report, and exit non-zero on failure.
    Run,
}

impl Command {
    /// Label recorded on the process span.
    #[must_use]
    pub const fn mode(self) -> &'static str {
        match self {
            Self::Serve => "serve",
            Self::Run => "run",
        }
    }
}
