mod api;
mod app;
mod chat;
mod config;
mod context;
mod error;
mod git;
mod input;
mod keymap;
mod models;
mod poller;
mod render;
mod status;
mod text_input;
mod theme;
mod ui;

#[cfg(test)]
mod test_support;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{
    self, DisableBracketedPaste, DisableFocusChange, EnableBracketedPaste, EnableFocusChange,
    Event,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::api::{AnalysisBackend, ApiClient};
use crate::app::{App, BackgroundEvent};
use crate::config::Config;

/// Terminal chat client for a project-analysis backend.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Backend root URL, e.g. http://127.0.0.1:8080
    #[arg(long, env = "QCHAT_BASE_URL")]
    base_url: Option<String>,

    /// Project name as the backend knows it.
    #[arg(long)]
    project: Option<String>,

    /// Query (chat) id within the project.
    #[arg(long)]
    query_id: Option<String>,

    /// Absolute path of the project sources, for editor links.
    #[arg(long)]
    source_dir: Option<String>,

    /// Config file to use instead of ~/.config/qchat/config.toml
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(url) = self.base_url {
            config.server.base_url = url;
        }
        if let Some(project) = self.project {
            config.session.project_name = project;
        }
        if let Some(query_id) = self.query_id {
            config.session.query_id = query_id;
        }
        if let Some(dir) = self.source_dir {
            config.session.source_dir = Some(dir);
        }
    }
}

fn init_tracing() -> Result<()> {
    // Log to file if QCHAT_LOG_FILE is set, otherwise stderr
    let log_writer: Box<dyn io::Write + Send> = match std::env::var("QCHAT_LOG_FILE") {
        Ok(path) => Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {path}"))?,
        ),
        Err(_) => Box::new(io::stderr()),
    };
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_writer))
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;
    config.validate_keybindings()?;
    args.apply(&mut config);
    let session = config.session()?;

    info!(project = %session.project, query = %session.query_id, "qchat starting");

    let client = ApiClient::new(
        &config.server.base_url,
        Duration::from_secs(config.server.request_timeout_secs),
    )?;
    let backend: Arc<dyn AnalysisBackend> = Arc::new(client);

    let (bg_tx, bg_rx) = mpsc::unbounded_channel::<BackgroundEvent>();
    let (focus_tx, focus_rx) = watch::channel(true);
    let mut app = App::new(
        &config,
        session.clone(),
        Arc::clone(&backend),
        bg_tx.clone(),
        focus_tx,
    );

    // Setup terminal
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = io::stdout();
    stdout
        .execute(EnterAlternateScreen)
        .context("Failed to enter alternate screen")?;
    stdout
        .execute(EnableBracketedPaste)
        .context("Failed to enable bracketed paste")?;
    stdout
        .execute(EnableFocusChange)
        .context("Failed to enable focus reporting")?;
    let term_backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(term_backend).context("Failed to create terminal")?;

    let poller = poller::spawn_git_poller(
        &bg_tx,
        backend,
        session,
        config.settings.git_poll_interval(),
        focus_rx,
    );
    app.start();

    let result = run_event_loop(&mut terminal, &mut app, bg_rx).await;

    // Cleanup (always runs, even if event loop errored)
    poller.abort();
    disable_raw_mode().ok();
    terminal.backend_mut().execute(DisableFocusChange).ok();
    terminal.backend_mut().execute(DisableBracketedPaste).ok();
    terminal.backend_mut().execute(LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    info!("qchat shut down");
    result
}

async fn run_event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    mut bg_rx: mpsc::UnboundedReceiver<BackgroundEvent>,
) -> Result<()> {
    loop {
        // ── 1. Draw the UI only when something actually changed ──────
        if app.needs_redraw {
            terminal.draw(|frame| ui::draw(frame, app))?;
            app.needs_redraw = false;
        }

        if app.should_quit {
            break;
        }

        // ── 2. Drain ALL background events (zero-cost when empty) ────
        while let Ok(event) = bg_rx.try_recv() {
            app.handle_background_event(event);
            app.needs_redraw = true;
        }

        // ── 3. Expire banners, flashes and follow-up reloads ─────────
        if app.tick(Instant::now()) {
            app.needs_redraw = true;
        }

        // ── 4. Poll for crossterm events (16ms tick = 60fps) ─────────
        if event::poll(Duration::from_millis(16)).context("Event poll failed")? {
            app.needs_redraw = true;
            match event::read().context("Event read failed")? {
                Event::Key(key) => input::handle_key_event(app, key)?,
                Event::Paste(text) => input::handle_paste(app, &text),
                Event::FocusGained => app.set_terminal_focus(true),
                Event::FocusLost => app.set_terminal_focus(false),
                Event::Resize(..) | Event::Mouse(_) => {}
            }
        }
    }
    Ok(())
}
