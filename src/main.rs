use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod app;
mod chatlog;
mod config;
mod handler;
mod markdown;
mod stream;
mod tui;
mod ui;

use api::ApiClient;
use app::App;
use config::Config;

#[derive(Parser)]
#[command(name = "docchat")]
#[command(about = "Terminal client for a PDF document-chat service")]
struct Cli {
    /// Base URL of the chat service (remembered for next time)
    #[arg(short, long)]
    server: Option<String>,

    /// Write diagnostics to this file instead of the default location
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.log_file.as_deref())?;

    let config = Config::load().unwrap_or_else(|_| Config::new());
    let server_url = match cli.server {
        Some(url) => {
            let _ = Config::save_server_url(&url);
            url
        }
        None => config.server_url().to_string(),
    };

    tui::install_panic_hook();
    let mut terminal = tui::init()?;

    let mut events = tui::EventHandler::new();
    let mut app = App::new(ApiClient::new(&server_url), events.sender());

    info!(server = %server_url, "starting session");

    let result = run(&mut terminal, &mut app, &mut events).await;

    // Abandoned streams stop at their next suspension point.
    app.shutdown();
    tui::restore()?;

    result
}

async fn run(
    terminal: &mut tui::Tui,
    app: &mut App,
    events: &mut tui::EventHandler,
) -> Result<()> {
    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event),
            None => break,
        }
    }
    Ok(())
}

/// Diagnostics go to a file: the terminal belongs to the UI.
fn init_logging(path: Option<&Path>) -> Result<()> {
    let log_path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let dir = dirs::data_dir()
                .context("could not determine data directory")?
                .join("docchat");
            std::fs::create_dir_all(&dir)?;
            dir.join("docchat.log")
        }
    };

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("could not open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docchat=info")),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
