//! vitalboard-term: one terminal of the shared vitals board.
//!
//! Mirrors SharedState from the authority, accepts keystroke commands, and
//! shows the emergency control. Sync runs in pull or push mode.

mod app;
mod logging;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::mpsc;

use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};

use vitalboard_core::{
    load_board_config, transport_for, BoardConfig, Result, SyncMode, TerminalSession,
    ThreadScheduler,
};

#[derive(Parser, Debug)]
#[command(name = "vitalboard-term")]
#[command(about = "Shared vitals status board terminal")]
#[command(version)]
struct Cli {
    /// Sync strategy: periodic pull or push subscription
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Authority socket path
    #[arg(long, value_name = "PATH")]
    socket: Option<PathBuf>,

    /// Config file (defaults to ~/.vitalboard/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Seconds between pull fetches
    #[arg(long, value_name = "SECS")]
    poll_interval_secs: Option<u64>,

    /// Reject schedule times outside 0-23 / 0-59
    #[arg(long)]
    strict_time_range: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ModeArg {
    Pull,
    Push,
}

impl From<ModeArg> for SyncMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Pull => SyncMode::Pull,
            ModeArg::Push => SyncMode::Push,
        }
    }
}

/// Command-line flags win over file values.
fn apply_overrides(mut config: BoardConfig, cli: &Cli) -> Result<BoardConfig> {
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    if let Some(socket) = &cli.socket {
        config.socket_path = Some(socket.clone());
    }
    if let Some(secs) = cli.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    if cli.strict_time_range {
        config.strict_time_range = true;
    }
    config.validate()?;
    Ok(config)
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let config = match load_board_config(cli.config.clone()).and_then(|c| apply_overrides(c, &cli)) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("vitalboard-term: {}", err);
            tracing::error!(error = %err, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    let socket = match config.resolve_socket_path() {
        Ok(socket) => socket,
        Err(err) => {
            eprintln!("vitalboard-term: {}", err);
            tracing::error!(error = %err, "Failed to resolve authority socket");
            std::process::exit(1);
        }
    };
    tracing::info!(mode = %config.mode, socket = %socket.display(), "vitalboard-term starting");

    let (tx, rx) = mpsc::channel();
    let transport = transport_for(config.mode, socket, config.poll_interval(), tx.clone());
    let mut session = TerminalSession::new(
        &config,
        transport,
        Box::new(ThreadScheduler::new(tx.clone())),
    );
    // Already logged; the board still runs on local state.
    let _ = session.start();

    app::spawn_input_thread(tx.clone());
    app::spawn_tick_thread(tx);

    if let Err(err) = run_terminal(&mut session, rx) {
        tracing::error!(error = %err, "Terminal error");
        eprintln!("Error: {err:?}");
        std::process::exit(1);
    }
}

fn run_terminal(session: &mut TerminalSession, events: mpsc::Receiver<vitalboard_core::SessionEvent>) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = app::run(&mut terminal, session, events);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}
