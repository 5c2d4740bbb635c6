//! Logging setup
//!
//! The client logs through `tracing`; applications that do not install their own
//! subscriber can use these helpers.

/// Install a fmt subscriber at INFO, or DEBUG when `verbose`
///
/// Panics if a global subscriber is already installed.
pub fn setup_logging(verbose: bool) {
    subscriber(verbose).init();
}

/// Like [`setup_logging`] but returns an error instead of panicking when a subscriber is
/// already installed
pub fn try_setup_logging(
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    subscriber(verbose).try_init()
}

fn subscriber(verbose: bool) -> tracing_subscriber::fmt::SubscriberBuilder {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
}
