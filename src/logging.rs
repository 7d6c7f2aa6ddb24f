// Logging for the aviary runtime.
// Built on the `tracing` ecosystem; the runtime itself only emits events and
// never installs a subscriber unless asked to through this module.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, registry::Registry, EnvFilter};

/// Configuration for the runtime's log output.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display.
    pub level: Level,
    /// Whether to include thread names and ids.
    pub show_thread_info: bool,
    /// Whether to include file and line information.
    pub show_file_line: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            show_thread_info: true,
            show_file_line: false,
        }
    }
}

static INIT: Once = Once::new();

/// Installs a global subscriber with the given configuration.
///
/// Only the first call in a process has any effect; later calls (and calls
/// made after another subscriber has been installed) are no-ops.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::from_default_env().add_directive(config.level.into());

        let fmt_layer = fmt::layer()
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line);

        let subscriber = Registry::default().with(env_filter).with(fmt_layer);
        if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("failed to set global tracing subscriber: {err}");
        }
    });
}

/// Installs the default configuration.
pub fn init_default() {
    init(LogConfig::default());
}

/// Quiet configuration for tests: warnings and errors only, with source
/// locations to make failures easy to chase.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        show_thread_info: false,
        show_file_line: true,
    });
}
