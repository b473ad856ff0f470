// crates/group-memory/src/telemetry.rs

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");

/// This crate and request spans at info; pool, hyper and reqwest chatter only when it matters
pub const DEFAULT_FILTER: &str = "warn,group_memory=info,tower_http=info";
pub const VERBOSE_FILTER: &str = "warn,group_memory=debug,tower_http=debug";

/// Directives from `rust_log` when present and valid, otherwise the service defaults
pub fn env_filter(rust_log: Option<&str>, verbose: bool) -> EnvFilter {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    match rust_log.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => EnvFilter::try_new(directives).unwrap_or_else(|e| {
            eprintln!("{}: ignoring invalid RUST_LOG ({}), using {}", SERVICE_NAME, e, fallback);
            EnvFilter::new(fallback)
        }),
        None => EnvFilter::new(fallback),
    }
}

/// Install the global fmt subscriber. Later calls are ignored.
pub fn init_tracing(verbose: bool) {
    let filter = env_filter(std::env::var("RUST_LOG").ok().as_deref(), verbose);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        info!(service = SERVICE_NAME, version = env!("CARGO_PKG_VERSION"), "Logging initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_scopes_this_crate() {
        let filter = env_filter(None, false).to_string();
        assert!(filter.contains("group_memory=info"));
        assert!(filter.contains("tower_http=info"));
        assert!(filter.contains("warn"));

        let verbose = env_filter(Some("  "), true).to_string();
        assert!(verbose.contains("group_memory=debug"));
    }

    #[test]
    fn test_rust_log_overrides_and_bad_directives_fall_back() {
        let custom = env_filter(Some("group_memory=trace"), false).to_string();
        assert!(custom.contains("group_memory=trace"));
        assert!(!custom.contains("tower_http"));

        let fallback = env_filter(Some("group_memory=loudest"), false).to_string();
        assert!(fallback.contains("group_memory=info"));
    }
}
