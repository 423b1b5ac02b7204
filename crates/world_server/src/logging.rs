//! Logging system setup and configuration.
//!
//! Both processes usually log to the same collector, so every line carries
//! the process side through the root `process` span.

use crate::config::LoggingSettings;
use tracing::{info, info_span, Span};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use world_core::ProcessSide;

/// Filter directives for the configured levels. The link crate gets its
/// own level when one is set.
pub fn filter_directives(config: &LoggingSettings) -> String {
    match &config.link_level {
        Some(link) => format!("{},sync_link={}", config.level, link),
        None => config.level.clone(),
    }
}

/// Initializes the tracing subscriber.
///
/// `RUST_LOG` wins over the configured levels when set. `json_format` forces
/// JSON output regardless of the config file.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let directives = filter_directives(config);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&directives))?;

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_thread_names(true),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()?;
    }

    info!("🔧 Logging initialized: {}", directives);
    Ok(())
}

/// Root span for everything one process does.
pub fn process_span(side: ProcessSide) -> Span {
    info_span!("process", side = %side)
}

/// Logs the startup banner.
pub fn display_banner(side: ProcessSide) {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    let title = match side {
        ProcessSide::Game => "🗺️  WORLD SERVER · GAME",
        ProcessSide::Ai => "🧠 WORLD SERVER · AI",
    };
    info!("╔══════════════════════════════════════════╗");
    info!("║  {:<40}║", title);
    info!("║  v{:<39}║", version);
    info!("╚══════════════════════════════════════════╝");
}
