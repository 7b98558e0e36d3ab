//! epicwatch-tail - follow a workflow event stream from the terminal
//!
//! Prints session status transitions and every applied event as a line,
//! until Ctrl+C or, with `--until-complete`, until the stream closes cleanly.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Logs: $XDG_STATE_HOME/epicwatch/epicwatch.YYYY-MM-DD.log (~/.local/state/epicwatch/)
//! - Config: $XDG_CONFIG_HOME/epicwatch/config.toml (~/.config/epicwatch/config.toml)

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use epicwatch_core::format::{format_clock, format_delay_ms};
use epicwatch_core::{Config, DashboardView, SessionRunner, SessionStatus};

#[derive(Parser)]
#[command(name = "epicwatch-tail")]
#[command(about = "Print workflow events as they are applied")]
#[command(version)]
struct Args {
    /// Verbose output (-v sequencing counters, -vv outcome of every event)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Print the resolved configuration and exit
    #[arg(long)]
    dry_run: bool,

    /// Server base URL, overriding the config file
    #[arg(long)]
    url: Option<String>,

    /// Print activity as JSON lines instead of text
    #[arg(long)]
    json: bool,

    /// Exit once the workflow stream closes cleanly
    #[arg(long)]
    until_complete: bool,

    /// How often to check for Ctrl+C while the stream is quiet, in milliseconds
    #[arg(long, default_value = "250")]
    poll: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(url) = &args.url {
        config.server.base_url = url.clone();
    }
    config.validate().context("invalid configuration")?;

    if args.dry_run {
        return print_config(&config);
    }

    // Initialize logging
    let _log_guard =
        epicwatch_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("epicwatch-tail starting");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    let (runner, handle) = SessionRunner::new(&config).context("failed to create session")?;
    let session_task = runtime.spawn(runner.run());

    println!("Following {}", config.server.events_url());

    let result = runtime.block_on(follow(&handle, &args));

    handle.shutdown();
    let stats = runtime
        .block_on(async { tokio::time::timeout(Duration::from_secs(2), session_task).await })
        .context("session did not stop in time")?
        .context("session task failed")?;

    println!(
        "Stopped. {} applied, {} no-op, {} invalid, {} transport errors",
        stats.applied,
        stats.unresolved + stats.ignored,
        stats.invalid_messages,
        stats.transport_errors
    );
    tracing::info!("epicwatch-tail stopped");

    result
}

fn print_config(config: &Config) -> Result<()> {
    println!("Config file: {}", Config::config_path().display());
    println!("Log file: {}", Config::log_path().display());
    println!("Events: {}", config.server.events_url());
    println!("State: {}", config.server.state_url());
    println!();
    let rendered = toml::to_string_pretty(config).context("failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

/// Print every published view until Ctrl+C
async fn follow(handle: &epicwatch_core::SessionHandle, args: &Args) -> Result<()> {
    // Set up signal handler for graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();

    ctrlc::set_handler(move || {
        eprintln!("\nShutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .context("failed to set Ctrl+C handler")?;

    let mut views = handle.subscribe();
    let poll_duration = Duration::from_millis(args.poll);
    let mut printer = Printer::default();
    let mut stdout = io::stdout();

    let view = views.borrow_and_update().clone();
    printer.print(&mut stdout, &view, args)?;

    while running.load(Ordering::SeqCst) {
        match tokio::time::timeout(poll_duration, views.changed()).await {
            Ok(Ok(())) => {
                let view = views.borrow_and_update().clone();
                printer.print(&mut stdout, &view, args)?;
                if args.until_complete && view.status == SessionStatus::Complete {
                    break;
                }
            }
            // Runner exited on its own; show whatever it published last
            Ok(Err(_)) => {
                let view = views.borrow().clone();
                printer.print(&mut stdout, &view, args)?;
                break;
            }
            // Quiet stream, check for Ctrl+C again
            Err(_) => {}
        }
    }

    Ok(())
}

/// Remembers what has already been printed
#[derive(Default)]
struct Printer {
    status: Option<SessionStatus>,
    /// Activity ordinals start at 1, so 0 means nothing printed yet
    last_ordinal: u64,
    last_counters: Option<String>,
}

impl Printer {
    fn print(&mut self, out: &mut impl Write, view: &DashboardView, args: &Args) -> Result<()> {
        let timestamp = chrono::Local::now().format("%H:%M:%S");

        if self.status != Some(view.status) {
            self.status = Some(view.status);
            match view.reconnect {
                Some((attempt, delay_ms)) if view.status == SessionStatus::Stopped => writeln!(
                    out,
                    "[{}] status: {} (reconnect #{} in {})",
                    timestamp,
                    view.status,
                    attempt,
                    format_delay_ms(delay_ms)
                )?,
                _ => writeln!(out, "[{}] status: {}", timestamp, view.status)?,
            }
        }

        for entry in &view.activity {
            if entry.ordinal <= self.last_ordinal {
                continue;
            }
            // The view only carries the most recent entries
            let skipped = entry.ordinal - self.last_ordinal - 1;
            if skipped > 0 {
                if args.json {
                    writeln!(out, "{}", serde_json::json!({ "skipped": skipped }))?;
                } else {
                    writeln!(out, "[{}] ... {} events not shown", timestamp, skipped)?;
                }
            }
            self.last_ordinal = entry.ordinal;

            if args.json {
                let line = serde_json::to_string(entry).context("failed to encode activity")?;
                writeln!(out, "{}", line)?;
                continue;
            }
            // Without -vv only events that changed the tree are shown
            if entry.outcome != "updated" && args.verbose < 2 {
                continue;
            }
            writeln!(
                out,
                "[{}] {} #{} {}{}",
                format_clock(entry.emitted_at),
                entry.run_id,
                entry.sequence_id,
                entry.summary,
                if args.verbose >= 2 {
                    format!(" ({})", entry.outcome)
                } else {
                    String::new()
                }
            )?;
        }

        // -v: sequencing counters whenever they move
        if args.verbose >= 1 {
            let counters = format!(
                "  seq {} pending {} duplicates {} stale {} invalid {}",
                view.last_sequence,
                view.pending,
                view.sequencer.duplicates,
                view.sequencer.stale,
                view.stats.invalid_messages
            );
            if self.last_counters.as_deref() != Some(counters.as_str()) {
                writeln!(out, "{}", counters)?;
                self.last_counters = Some(counters);
            }
        }

        out.flush()?;
        Ok(())
    }
}
