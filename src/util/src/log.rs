use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// Installs global tracing subscriber, writing to stderr.
///
/// Filter is taken from `RUST_LOG` (defaults to `info`).
/// Set `JJS_LOG_FORMAT=json` to get JSON lines.
pub fn setup() {
    static FLAG: AtomicBool = AtomicBool::new(false);
    if FLAG.swap(true, Ordering::SeqCst) {
        return;
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let json = std::env::var("JJS_LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);
    let res = if json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
    if let Err(err) = res {
        eprintln!("failed to install logger: {}", err);
    }
}
