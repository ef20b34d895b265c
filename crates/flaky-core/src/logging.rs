//! Structured logging setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Initialise `tracing` output on stderr, honouring `RUST_LOG`.
///
/// Defaults to `flaky_core=info`. Safe to call more than once.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "flaky_core=debug,_flaky_core=debug"
    } else {
        "flaky_core=info,_flaky_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
