use tracing_subscriber::EnvFilter;

/// Install a `tracing` fmt subscriber for programs that have none.
///
/// The filter comes from `FEYNMAN_LOG`, then `RUST_LOG`, then `info`. Trace
/// stubs are logged under the `feynman::trace` target, so
/// `FEYNMAN_LOG=feynman::trace=info,warn` shows them and little else.
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let filter = filter_directive(|var| std::env::var(var).ok());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .try_init();
}

/// The first of `FEYNMAN_LOG` and `RUST_LOG` that is set, else `info`.
fn filter_directive(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("FEYNMAN_LOG")
        .or_else(|| lookup("RUST_LOG"))
        .unwrap_or_else(|| "info".to_string())
}
