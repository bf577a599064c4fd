// file: src/utils/logging.rs
// description: tracing subscriber initialization and coloured terminal messages
// reference: https://docs.rs/tracing-subscriber

use crate::config::LoggingConfig;
use colored::*;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs the global subscriber for a host application. `RUST_LOG` wins
/// over the verbose flag. Returns false when a subscriber was already set.
pub fn init_logger(config: &LoggingConfig) -> bool {
    let level = if config.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_file(config.verbose)
        .with_line_number(config.verbose)
        .compact()
        .with_ansi(config.color);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}

pub fn format_success(msg: &str) -> String {
    format!("{} {}", "✓".green().bold(), msg.green())
}

pub fn format_error(msg: &str) -> String {
    format!("{} {}", "✗".red().bold(), msg.red())
}

pub fn format_warning(msg: &str) -> String {
    format!("{} {}", "⚠".yellow().bold(), msg.yellow())
}

pub fn format_info(msg: &str) -> String {
    format!("{} {}", "ℹ".blue().bold(), msg)
}

pub fn format_step(step: usize, total: usize, msg: &str) -> String {
    format!("{} {}", format!("[{}/{}]", step, total).cyan().bold(), msg)
}
