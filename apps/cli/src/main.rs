//! threadmem - inspect and edit persisted conversation threads.
//!
//! Usage:
//! ```bash
//! threadmem create --owner u1 --name "support"
//! threadmem post <thread-id> --role user --text "Hi" --image ./screenshot.png
//! threadmem list --owner u1 --format json
//! threadmem export <thread-id>
//! ```
//!
//! Storage is configured through the environment (`DB_TYPE`, `THREADS_DB_PATH`,
//! `STORAGE_BUCKET`, ...). A `.env` file in the working directory is honoured.

mod commands;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commands::Cli;
use threadmem_core::{Config, ImageStore, ThreadService};

fn init_tracing(verbose: bool) {
    let log_format =
        std::env::var("THREADMEM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays parseable.
    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn build_service(config: &Config) -> anyhow::Result<ThreadService> {
    let repository = threadmem_storage::connect(&config.database)?;
    let images = ImageStore::from_config(&config.images)?;
    tracing::debug!(
        "Thread store ready (bucket images: {})",
        images.uses_bucket()
    );
    Ok(ThreadService::new(repository, Arc::new(images)))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_env()?;
    let service = build_service(&config)?;
    let stdout = std::io::stdout();
    commands::run(&service, cli.command, cli.format, &mut stdout.lock())
}
