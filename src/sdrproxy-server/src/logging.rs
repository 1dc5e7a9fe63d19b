use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initializes logging with an optional level from config. Falls back to
/// INFO if the level is missing or doesn't parse.
pub fn init_logging(log_level: Option<&str>) {
    let level = log_level
        .and_then(|s| s.parse::<Level>().ok())
        .unwrap_or(Level::INFO);

    FmtSubscriber::builder()
        .with_target(false)
        .with_max_level(level)
        .init();
}
