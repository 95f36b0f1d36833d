//! Periodic-pull strategy.
//!
//! One worker thread owns all socket traffic and runs jobs in FIFO order, so a
//! commit's update always reaches the authority before the extra fetch that
//! follows it. A poller thread enqueues a fetch every interval; a fetch that is
//! already queued is not queued twice, unless an update has been queued behind
//! it since.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use vitalboard_protocol::{update_params, FieldUpdate, Method, StateSnapshot};

use super::wire::send_request;
use super::{RemoteEvent, Transport};
use crate::config::SyncMode;
use crate::error::{BoardError, Result};
use crate::session::SessionEvent;

enum Job {
    Fetch,
    Update(FieldUpdate),
}

pub struct PullTransport {
    socket: PathBuf,
    interval: Duration,
    events: Sender<SessionEvent>,
    jobs: Option<Sender<Job>>,
    fetch_queued: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl PullTransport {
    pub fn new(socket: PathBuf, interval: Duration, events: Sender<SessionEvent>) -> Self {
        Self {
            socket,
            interval,
            events,
            jobs: None,
            fetch_queued: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn enqueue_fetch(&self) {
        if let Some(jobs) = &self.jobs {
            queue_fetch(jobs, &self.fetch_queued);
        }
    }
}

fn queue_fetch(jobs: &Sender<Job>, fetch_queued: &AtomicBool) -> bool {
    if fetch_queued.swap(true, Ordering::SeqCst) {
        return true;
    }
    jobs.send(Job::Fetch).is_ok()
}

impl Transport for PullTransport {
    fn mode(&self) -> SyncMode {
        SyncMode::Pull
    }

    fn start(&mut self) -> Result<()> {
        if self.jobs.is_some() {
            return Ok(());
        }

        let (jobs_tx, jobs_rx) = mpsc::channel();
        {
            let socket = self.socket.clone();
            let events = self.events.clone();
            let fetch_queued = Arc::clone(&self.fetch_queued);
            thread::spawn(move || run_worker(socket, jobs_rx, events, fetch_queued));
        }
        {
            let jobs = jobs_tx.clone();
            let interval = self.interval;
            let fetch_queued = Arc::clone(&self.fetch_queued);
            let stop = Arc::clone(&self.stop);
            thread::spawn(move || loop {
                thread::sleep(interval);
                if stop.load(Ordering::SeqCst) || !queue_fetch(&jobs, &fetch_queued) {
                    break;
                }
            });
        }

        self.jobs = Some(jobs_tx);
        self.enqueue_fetch();
        tracing::info!(
            socket = %self.socket.display(),
            interval_ms = self.interval.as_millis() as u64,
            "Pull sync started"
        );
        Ok(())
    }

    fn send_update(&mut self, update: FieldUpdate) {
        match &self.jobs {
            Some(jobs) => {
                if jobs.send(Job::Update(update)).is_err() {
                    tracing::warn!("Pull worker gone; update dropped");
                    return;
                }
                // A fetch queued before this update would read stale state, so
                // the next refresh must queue a new one behind it.
                self.fetch_queued.store(false, Ordering::SeqCst);
            }
            None => tracing::warn!(key = %update.key, "Pull sync not started; update dropped"),
        }
    }

    fn send_keystroke(&mut self, _ch: char) {}

    fn request_snapshot(&mut self) {
        self.enqueue_fetch();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the last job sender ends the worker once the poller exits.
        self.jobs = None;
    }
}

fn run_worker(
    socket: PathBuf,
    jobs: Receiver<Job>,
    events: Sender<SessionEvent>,
    fetch_queued: Arc<AtomicBool>,
) {
    for job in jobs {
        let outcome = match job {
            Job::Fetch => {
                fetch_queued.store(false, Ordering::SeqCst);
                fetch_snapshot(&socket).map(|snapshot| {
                    let _ = events.send(SessionEvent::Remote(RemoteEvent::Snapshot(snapshot)));
                })
            }
            Job::Update(update) => {
                let key = update.key;
                post_update(&socket, update).map(|_| {
                    tracing::debug!(key = %key, "Update accepted");
                })
            }
        };

        if let Err(err) = outcome {
            tracing::warn!(error = %err, "Pull sync request failed");
            let failure = SessionEvent::TransportFailed(err.to_string());
            if events.send(failure).is_err() {
                break;
            }
        }
    }
    tracing::debug!("Pull worker stopped");
}

fn fetch_snapshot(socket: &std::path::Path) -> Result<StateSnapshot> {
    let response = send_request(socket, Method::GetState, None)?;
    let data = response.data.ok_or(BoardError::EmptyResponse)?;
    serde_json::from_value(data).map_err(|source| BoardError::Json {
        context: "Snapshot payload invalid".to_string(),
        source,
    })
}

fn post_update(socket: &std::path::Path, update: FieldUpdate) -> Result<()> {
    send_request(socket, Method::Update, Some(update_params(&[update])))?;
    Ok(())
}
