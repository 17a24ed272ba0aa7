use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber. Calling this twice keeps the first
/// subscriber.
pub fn init_tracing(debug_mode: bool) {
    let env_filter = filter_directive(debug_mode, std::env::var("RUST_LOG").ok());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env_filter))
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// `RUST_LOG` wins when set; otherwise "debug" in debug mode and "info"
/// elsewhere.
fn filter_directive(debug_mode: bool, rust_log: Option<String>) -> String {
    match rust_log.filter(|directive| !directive.trim().is_empty()) {
        Some(directive) => directive,
        None if debug_mode => "debug".to_string(),
        None => "info".to_string(),
    }
}
