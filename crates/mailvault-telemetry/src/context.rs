//! Span helpers for process-wide and per-run context.
//!
//! # Design
//! - The process span carries mode and build identifier for every event.
//! - Each backup run gets its own span so every stage log line carries the run id
//!   and trigger without repeating them at call sites.

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Guard that keeps the application-level span entered for the lifetime of the process.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the application-level tracing span for the lifetime of the guard.
    #[must_use]
    pub fn new(mode: impl Into<String>) -> Self {
        let mode = mode.into();
        let span: &'static Span = Box::leak(Box::new(
            tracing::info_span!("mailvault", mode = %mode, build_sha = %build_sha()),
        ));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Create the span wrapping a single backup run.
///
/// The `state` field starts empty and is filled in by [`record_run_state`] as
/// the run advances.
#[must_use]
pub fn backup_run_span(run_id: &str, trigger: &str) -> Span {
    tracing::info_span!(
        "backup_run",
        run_id = %run_id,
        trigger = %trigger,
        state = tracing::field::Empty
    )
}

/// Record the run's current lifecycle state on its span.
pub fn record_run_state(span: &Span, state: &str) {
    span.record("state", tracing::field::display(state));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_context_guard_can_be_dropped() {
        let guard = GlobalContextGuard::new("test");
        drop(guard);
    }

    #[test]
    fn run_span_accepts_state_updates() {
        let span = backup_run_span("run-1", "manual");
        record_run_state(&span, "connected");
        record_run_state(&span, "succeeded");
        let _entered = span.enter();
        tracing::info!("inside run span");
    }
}
