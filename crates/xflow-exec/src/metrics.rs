//! Scheduler-step events.
//!
//! Only built with the `tracing` feature; call sites are gated the same way
//! so their arguments are never formatted otherwise. The CLI installs the
//! subscriber that collects them.

pub fn emit_span(event: &str, key_values: &[(&str, String)]) {
    let span = tracing::span!(tracing::Level::TRACE, "xflow", event);
    let _entered = span.enter();
    for (k, v) in key_values {
        tracing::trace!(%event, %k, %v, "metric");
    }
}
