//! Logging entry point, called once from the server binary (grounded on
//! `restflow-server/src/main.rs`'s `tracing_subscriber::fmt()` setup).

/// Initialize the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter; otherwise this crate's own target logs at `debug` and
/// everything else at `info`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,conclave_core=debug,conclave_ai=debug".into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();
}
