pub mod chat;
pub mod gate;
pub mod inference;

/// Initialize the tracing subscriber — structured logs to stderr so they
/// never interleave with the chat output on stdout.
///
/// Filter defaults to `lumo_ops=info,warn`; override with `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("lumo_ops=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "lumo-ops starting"
    );
}
