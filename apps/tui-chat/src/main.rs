//! Terminal chat client for a remote agent service.
//!
//! Run with: `AGENT_CHAT_AGENT_ID=<agent> cargo run -p tui-chat -- [/sessions/<id>]`
//!
//! The optional argument is the starting location path (default `/`).

mod app;
mod input;
mod ui;

use std::{fs::File, io, sync::Arc, sync::Mutex, time::Duration};

use agent_chat_client::HttpBackend;
use agent_chat_core::ChatConfig;
use agent_chat_session::{MemoryLocation, ROOT_PATH};
use anyhow::Context;
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    app::App,
    input::{Action, key_to_action},
};

const LOG_FILE_ENV: &str = "AGENT_CHAT_LOG";
const DEFAULT_LOG_FILE: &str = "agent-chat.log";
/// Redraw cadence while no input arrives.
const TICK: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The terminal belongs to the UI; logs go to a file.
    let log_path = std::env::var(LOG_FILE_ENV).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_owned());
    let log_file =
        File::create(&log_path).with_context(|| format!("Failed to open log file {log_path}"))?;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Configuration errors are fatal before anything is drawn.
    let config = ChatConfig::from_env().context("Invalid configuration")?;
    let backend = Arc::new(HttpBackend::from_config(&config)?);
    let start_path = std::env::args().nth(1).unwrap_or_else(|| ROOT_PATH.to_owned());
    tracing::info!(api = %config.api_base_url(), path = %start_path, "Starting tui-chat");

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    let location = Arc::new(MemoryLocation::new(start_path));
    let mut app = App::new(&config, backend, location);
    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App<HttpBackend>,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut dirty = true;
    loop {
        dirty |= app.pump();
        if dirty {
            terminal.draw(|f| ui::draw(f, app))?;
            dirty = false;
        }

        let event = tokio::select! {
            event = events.next() => event,
            () = tokio::time::sleep(TICK) => continue,
        };
        match event {
            Some(Ok(Event::Key(key))) => match key_to_action(&key) {
                Some(Action::Submit) if app.prepare_submit() => {
                    // Session creation may take a while; keep Esc and Ctrl+C live.
                    terminal.draw(|f| ui::draw(f, app))?;
                    let mut quit = false;
                    app.submit_or_cancel(wait_for_cancel(&mut events, &mut quit))
                        .await;
                    if quit {
                        app.handle(Action::Quit).await;
                    }
                    dirty = true;
                }
                Some(action) => {
                    app.handle(action).await;
                    dirty = true;
                }
                None => {}
            },
            Some(Ok(Event::Resize(..))) => dirty = true,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                return Err(anyhow::Error::new(e).context("Failed to read terminal input"));
            }
            None => {
                tracing::info!("Terminal input closed");
                return Ok(());
            }
        }

        if app.should_quit() {
            tracing::info!("Quitting");
            return Ok(());
        }
    }
}

/// Resolve once the user presses Esc or Ctrl+C. Other keys are dropped.
async fn wait_for_cancel(events: &mut EventStream, quit: &mut bool) {
    while let Some(event) = events.next().await {
        let Ok(Event::Key(key)) = event else {
            continue;
        };
        match key_to_action(&key) {
            Some(Action::Stop) => return,
            Some(Action::Quit) => {
                *quit = true;
                return;
            }
            _ => {}
        }
    }
    // Without input only the request timeout ends the wait.
    std::future::pending::<()>().await;
}
