use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `fmt` subscriber. `RUST_LOG` wins over the default
/// `info` filter; a second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
