//! `tracing` setup for the `flow` binary.
//!
//! flow writes two kinds of output and keeps them apart. What the operator is
//! meant to read (step results, approval messages, prompts, queue summaries)
//! goes through [`crate::io::console::Console`] and never depends on
//! `RUST_LOG`. `tracing` events are diagnostics about agent invocations and
//! retries; they go to stderr behind an env filter, so `flow next` stays
//! clean to parse from scripts.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "warn";

/// Install the global subscriber: compact lines on stderr.
///
/// `RUST_LOG=flow=debug flow run` shows every decision and agent call.
/// Safe to call more than once; later calls keep the first subscriber.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_keeps_first_subscriber() {
        init();
        init();
        tracing::warn!("still logging after second init");
    }
}
