use tracing_subscriber::EnvFilter;

/// Install the stderr `tracing` subscriber. `ROUTELENS_LOG` wins over
/// `RUST_LOG`; without either, `verbose` picks between info and debug.
pub fn init(verbose: bool) {
    let default = if verbose { "routelens=debug" } else { "routelens=info" };
    let filter = std::env::var("ROUTELENS_LOG")
        .ok()
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default));

    // A second init (tests, embedding hosts) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
