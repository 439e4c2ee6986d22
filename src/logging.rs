use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static TRACING_INIT: Once = Once::new();

/// Initialize the global tracing subscriber once.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at `info`, or at
/// `debug` when `verbose` is on. Logs go to stderr so command output on
/// stdout stays clean.
pub fn init_tracing(verbose: bool) {
    TRACING_INIT.call_once(|| {
        let default_level = if verbose { "cashflow=debug" } else { "cashflow=info" };
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let _ = fmt()
            .with_env_filter(filter)
            .with_target(verbose)
            .with_writer(std::io::stderr)
            .compact()
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false);
        init_tracing(true);
        tracing::info!("still logging");
    }
}
