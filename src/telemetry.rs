//! Telemetry initialization.
//!
//! Controlled by `RUST_LOG`. By default, structured JSON events go to
//! stderr with span-close timing; set `RUST_LOG=off` for silence.

use tracing_subscriber::EnvFilter;

/// Opaque guard, held in `main()` (or the host process's equivalent) until
/// exit. Dropping it is a no-op today but keeps the call site stable if a
/// flushed exporter is added later.
pub struct TelemetryGuard(());

/// Initialize a stderr JSON subscriber using `RUST_LOG` (default: `info`).
///
/// Returns a guard that should be held until the program exits.
pub fn init() -> TelemetryGuard {
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE),
        )
        .try_init();

    TelemetryGuard(())
}
