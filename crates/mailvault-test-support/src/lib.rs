//! Shared test helpers used across integration suites.
//!
//! Layout: `clock.rs` (fixed time), `remote.rs` (scripted SSH host),
//! `store.rs` (in-memory container), `fixtures.rs` (config sources and a
//! wired harness).
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

pub mod clock;
pub mod fixtures;
pub mod remote;
pub mod store;

pub use clock::FixedClock;
pub use fixtures::{
    ARCHIVE, HOST, Harness, PRIVATE_KEY, SOURCE_PATH, USER, backup_source, reference_time,
};
pub use remote::{CommandGate, ScriptedRemote};
pub use store::{MemoryObjectStore, StoreOp};
