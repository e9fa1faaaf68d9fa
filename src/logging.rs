use tracing_subscriber::{EnvFilter, fmt};

pub const LOG_ENV: &str = "SUMSTATS_LOG";

/// Install the stderr subscriber.
///
/// Reads `SUMSTATS_LOG`, then `RUST_LOG`. Without either, logs `info` for this
/// crate (`debug` when `verbose`) and `warn` for everything else. Stdout is
/// left to command output.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

    // A subscriber may already be installed, e.g. by a test harness.
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "warn,sumstats=debug"
    } else {
        "warn,sumstats=info"
    }
}
