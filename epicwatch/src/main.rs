//! epicwatch - live dashboard for epic/story development workflows
//!
//! Terminal UI that follows a workflow backend's event stream and shows the
//! project tree, run progress and recent activity as they change.

mod app;
mod ui;

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use epicwatch_core::{Config, SessionRunner};
use ratatui::{backend::CrosstermBackend, Terminal};

use crate::app::App;

/// How long to wait for the session to wind down on quit
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging (to file, not stdout since we have a TUI)
    let _log_guard =
        epicwatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("epicwatch TUI starting up");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let (runner, handle) = SessionRunner::new(&config).context("failed to create session")?;
    let session_task = runtime.spawn(runner.run());

    let mut app = App::new(handle.clone());

    // Setup terminal
    enable_raw_mode().context("failed to enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to create terminal")?;

    // Run the main loop
    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;

    // Stop the session; a pending reconnect must not fire after this
    handle.shutdown();
    match runtime.block_on(async { tokio::time::timeout(SHUTDOWN_GRACE, session_task).await }) {
        Ok(Ok(stats)) => tracing::info!(
            applied = stats.applied,
            transport_errors = stats.transport_errors,
            "Session stopped"
        ),
        Ok(Err(e)) => tracing::warn!(error = %e, "Session task failed"),
        Err(_) => tracing::warn!("Session did not stop in time"),
    }

    tracing::info!("epicwatch TUI shutting down");

    result
}

/// Run the main application loop.
fn run_app(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App) -> Result<()> {
    loop {
        // Pick up whatever the session published since the last frame
        app.refresh();

        // Render every tick so the heartbeat age keeps moving
        terminal.draw(|frame| ui::render(frame, app))?;

        // Handle events
        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key(key);
                }
            }
        }

        // Check if we should quit
        if app.should_quit {
            break;
        }
    }

    Ok(())
}
