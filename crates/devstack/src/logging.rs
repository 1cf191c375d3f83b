use tracing::Level;

/// Environment variable that sets the log level when no flag does
pub const LOG_ENV: &str = "DEVSTACK_LOG";

/// Install the global fmt subscriber
///
/// Logs go to stderr; stdout carries command output only.
pub fn init(verbose: u8, quiet: bool) {
    let env_level = std::env::var(LOG_ENV).ok();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_max_level(level(verbose, quiet, env_level.as_deref()))
        .init();
}

fn level(verbose: u8, quiet: bool, env_level: Option<&str>) -> Level {
    if quiet {
        return Level::WARN;
    }
    match verbose {
        0 => env_level
            .and_then(|value| value.parse().ok())
            .unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
