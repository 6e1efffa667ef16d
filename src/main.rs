mod agent;
mod app;
mod commands;
mod config;
mod connectivity;
mod error;
mod lifecycle;
mod todo;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "otodo")]
#[command(about = "An offline-capable todo list with a local caching agent")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/otodo/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Origin the app is served from
  #[arg(short, long)]
  origin: Option<Url>,

  #[command(subcommand)]
  command: Option<commands::Command>,
}

/// Log to a daily file under `log_dir`; warnings and errors also go to stderr.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
  let appender = tracing_appender::rolling::daily(log_dir, "otodo.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false),
    )
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::WARN),
    )
    .init();

  guard
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = match args.origin {
    Some(origin) => config.with_origin(origin)?,
    None => config,
  };

  let _guard = init_tracing(&config.data_dir()?.join("logs"));

  let app = app::App::new(config)?;
  app
    .run(args.command.unwrap_or(commands::Command::List))
    .await?;

  Ok(())
}
