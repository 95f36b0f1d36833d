//! # vitalboard-core
//!
//! Engine shared by every vitalboard terminal: the keystroke command language,
//! the derived next-measurement deadline, the debounced emergency control, the
//! local mirror of SharedState, and the two sync strategies that keep the
//! mirror in step with the state authority.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. Transports do I/O on worker threads and
//!   post [`SessionEvent`]s back to the owning loop.
//! - **One owner**: A [`TerminalSession`] owns its store, input, button and sync
//!   client. Nothing is global.
//! - **Derived state is local**: The overdue flag and next label are recomputed
//!   by each terminal and never trusted from the wire.
//! - **Last received wins**: Every field is overwritten whole.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::mpsc;
//! use vitalboard_core::{load_board_config, transport_for, SessionEvent, TerminalSession, ThreadScheduler};
//!
//! let config = load_board_config(None)?;
//! let (tx, rx) = mpsc::channel();
//! let transport = transport_for(config.mode, config.resolve_socket_path()?, config.poll_interval(), tx.clone());
//! let mut session = TerminalSession::new(&config, transport, Box::new(ThreadScheduler::new(tx)));
//! session.start()?;
//! while let Ok(event) = rx.recv() {
//!     if !session.handle(event, chrono::Local::now().naive_local()) {
//!         break;
//!     }
//! }
//! ```

pub mod button;
pub mod command;
pub mod config;
pub mod error;
pub mod input;
pub mod overdue;
pub mod patterns;
pub mod session;
pub mod store;
pub mod sync;
#[doc(hidden)]
pub mod testing;
pub mod timer;

pub use button::{Activation, ButtonPhase, ButtonStateMachine, FeedbackMarker};
pub use command::{parse_command, Command, CommandParser, Condition, Rejected, ScheduleField};
pub use config::{load_board_config, BoardConfig, SyncMode};
pub use error::{BoardError, Result};
pub use input::{InputController, Key, KeyOutcome};
pub use overdue::{compute_next, NextMeasurement, OverdueCalculator};
pub use session::{SessionEvent, TerminalSession};
pub use store::{LocalStateStore, Mutation};
pub use sync::{transport_for, Applied, PullTransport, PushTransport, RemoteEvent, SyncClient, Transport};
pub use timer::{Scheduler, ThreadScheduler, TimerHandle, TimerToken};
