use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initializes the global `tracing` subscriber.
///
/// Respects `RUST_LOG` via `EnvFilter`, falling back to `max_level` when unset.
/// Format is picked by `APP_ENV`: `production` gets line-delimited JSON for
/// log aggregation, anything else (including unset) gets the pretty
/// human-readable formatter.
pub fn init_tracer(max_level: Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(max_level.to_string()));
    if is_production() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

fn is_production() -> bool {
    std::env::var("APP_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}
