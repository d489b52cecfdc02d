//! mailvault service wiring.
//!
//! Layout: `bootstrap.rs` (boot and mode dispatch), `cli.rs` (argument
//! parsing), `scheduler.rs` (daily trigger), `http/` (on-demand trigger,
//! health, metrics).
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]

/// Process bootstrap and mode dispatch.
pub mod bootstrap;
/// Command-line arguments.
pub mod cli;
/// Application error type.
pub mod error;
/// HTTP trigger service.
pub mod http;
/// Daily scheduler.
pub mod scheduler;

pub use bootstrap::run_app;
pub use cli::{Cli, Command};
pub use error::{AppError, AppResult};
pub use http::{HttpState, router, serve};
pub use scheduler::{Scheduler, next_occurrence};
