//! Terminal front end for the telescope overlay.
//!
//! Runs one overlay session against the in-memory host rooted at a workspace
//! directory: types the query, waits for results, optionally moves the
//! selection and navigates, then prints the overlay buffer.

use std::{
  path::PathBuf,
  rc::Rc,
};

use anyhow::{
  Context,
  Result,
};
use clap::{
  ArgAction,
  Parser,
};
use the_telescope::{
  Command,
  OverlayController,
  TelescopeConfig,
  WorkspaceSearch,
  memory::MemoryHost,
  search::SearchOptions,
};
use tokio::task::LocalSet;

#[derive(Debug, Parser)]
#[command(name = "telescope")]
#[command(about = "Search a workspace through the telescope overlay")]
struct Cli {
  /// Workspace root to search
  #[arg(long, default_value = ".")]
  root: PathBuf,

  /// Config file to use instead of the user config
  #[arg(long)]
  config: Option<PathBuf>,

  /// Raise log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,

  /// Move the selection down this many times
  #[arg(long, default_value_t = 0)]
  down: usize,

  /// Move the selection up this many times
  #[arg(long, default_value_t = 0)]
  up: usize,

  /// Open the highlighted result and print where navigation landed
  #[arg(long)]
  select: bool,

  query: String,
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_logging(cli.verbose);

  let config = match &cli.config {
    Some(path) => TelescopeConfig::load(path)?,
    None => TelescopeConfig::load_default()?,
  };

  let runtime = tokio::runtime::Builder::new_current_thread()
    .enable_all()
    .build()
    .context("failed to start runtime")?;
  LocalSet::new().block_on(&runtime, run(cli, config))
}

fn init_logging(verbose: u8) {
  let level = match verbose {
    0 => log::LevelFilter::Warn,
    1 => log::LevelFilter::Info,
    2 => log::LevelFilter::Debug,
    _ => log::LevelFilter::Trace,
  };
  env_logger::Builder::new()
    .filter_level(level)
    .parse_default_env()
    .init();
}

async fn run(cli: Cli, config: TelescopeConfig) -> Result<()> {
  let root = cli
    .root
    .canonicalize()
    .with_context(|| format!("invalid workspace root {}", cli.root.display()))?;
  log::info!("searching {}", root.display());

  let host = Rc::new(MemoryHost::new(Some(root.clone())));
  let engine = Rc::new(WorkspaceSearch::new(
    Some(root),
    SearchOptions::from(&config),
  ));
  let overlay = OverlayController::new(host.clone(), engine, &config);

  Command::Search.execute(&overlay).await?;
  let document = overlay.document().context("overlay did not open")?;
  host.type_text(&cli.query);
  overlay.settled().await;

  for _ in 0..cli.down {
    Command::MoveSelectionDown.execute(&overlay).await?;
  }
  for _ in 0..cli.up {
    Command::MoveSelectionUp.execute(&overlay).await?;
  }

  for line in host.lines(document) {
    println!("{line}");
  }

  if !cli.select {
    Command::Close.execute(&overlay).await?;
    return Ok(());
  }

  Command::SelectResult.execute(&overlay).await?;
  if let Some(location) = host.active_location() {
    println!(
      "{}:{}",
      location.path.display(),
      location.cursor.line + 1
    );
  }
  for error in host.errors() {
    eprintln!("{error}");
  }
  Ok(())
}
