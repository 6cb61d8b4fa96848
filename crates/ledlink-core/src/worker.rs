//! Link worker: the single actor that owns the session.
//!
//! Front ends talk to it through a [`LinkHandle`]: intents go in over an
//! mpsc queue, [`LinkEvent`]s come out over a broadcast channel.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::config::LinkConfig;
use crate::frame::Frame;
use crate::manager::{ConnectionManager, ConnectionState, LinkEvent};
use crate::reconciler::{coalesce, IntendedDeviceState, Reconciler};
use crate::session::Connector;
use crate::{Error, Result};

const REQUEST_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;

enum Request {
    Intent(Command),
    Snapshot(tokio::sync::oneshot::Sender<(ConnectionState, IntendedDeviceState)>),
    Shutdown,
}

/// Cloneable handle to a running [`LinkWorker`].
#[derive(Clone)]
pub struct LinkHandle {
    requests: mpsc::Sender<Request>,
    events: broadcast::Sender<LinkEvent>,
}

impl LinkHandle {
    /// Queues a user intent.
    pub async fn submit(&self, command: Command) -> Result<()> {
        self.requests
            .send(Request::Intent(command))
            .await
            .map_err(|_| Error::WorkerGone)
    }

    /// Subscribes to link events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.events.subscribe()
    }

    /// Current connection state and intended strip state.
    pub async fn snapshot(&self) -> Result<(ConnectionState, IntendedDeviceState)> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.requests
            .send(Request::Snapshot(tx))
            .await
            .map_err(|_| Error::WorkerGone)?;
        rx.await.map_err(|_| Error::WorkerGone)
    }

    /// Asks the worker to close the session and stop.
    pub async fn shutdown(&self) -> Result<()> {
        self.requests
            .send(Request::Shutdown)
            .await
            .map_err(|_| Error::WorkerGone)
    }
}

/// Owns the connection manager and reconciler and runs the link loop.
pub struct LinkWorker<C: Connector> {
    manager: ConnectionManager<C>,
    reconciler: Reconciler,
    requests: mpsc::Receiver<Request>,
    status_interval: Duration,
    coalesce: bool,
    resync_pending: bool,
}

impl<C: Connector> LinkWorker<C> {
    pub fn new(connector: C, config: LinkConfig) -> (Self, LinkHandle) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let (event_tx, _) = broadcast::channel(EVENT_QUEUE);

        let worker = Self {
            status_interval: config.status_interval(),
            coalesce: config.coalesce,
            manager: ConnectionManager::new(connector, config, event_tx.clone()),
            reconciler: Reconciler::new(),
            requests: request_rx,
            resync_pending: false,
        };
        let handle = LinkHandle {
            requests: request_tx,
            events: event_tx,
        };
        (worker, handle)
    }

    /// Runs until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        info!("Link worker started for {}", self.manager.config().endpoint);
        let mut next_tick = Instant::now();

        loop {
            tokio::select! {
                request = self.requests.recv() => {
                    let Some(request) = request else { break };
                    let was_open = self.manager.state().is_open();
                    if !self.handle_request(request).await {
                        break;
                    }
                    if was_open && !self.manager.state().is_open() {
                        next_tick = Instant::now() + self.manager.next_retry_delay();
                    }
                }
                _ = tokio::time::sleep_until(next_tick) => {
                    next_tick = self.on_tick().await;
                }
            }
        }

        self.manager.disconnect();
        info!("Link worker stopped");
    }

    /// Returns false when the worker should stop.
    async fn handle_request(&mut self, first: Request) -> bool {
        let mut batch = Vec::new();
        let mut keep_running = true;
        let mut pending = Some(first);

        // Drain whatever else is queued so bursts can be coalesced
        while let Some(request) = pending.take().or_else(|| self.requests.try_recv().ok()) {
            match request {
                Request::Intent(command) => batch.push(command),
                Request::Snapshot(reply) => {
                    let _ = reply.send((self.manager.state(), self.reconciler.intended().clone()));
                }
                Request::Shutdown => {
                    keep_running = false;
                    break;
                }
            }
        }

        if self.coalesce && batch.len() > 1 {
            let before = batch.len();
            batch = coalesce(batch);
            if batch.len() < before {
                debug!("Coalesced {} queued intents into {}", before, batch.len());
            }
        }
        for command in batch {
            self.handle_intent(command).await;
        }
        keep_running
    }

    async fn handle_intent(&mut self, command: Command) {
        debug!("Intent: {}", command);
        let frame = self.reconciler.apply_intent(command);

        if !self.manager.state().is_open() {
            debug!("Link is down; intent kept for replay");
            return;
        }

        match self.manager.exchange(&frame).await {
            Ok(_) => {
                if self.resync_pending {
                    self.replay().await;
                }
            }
            Err(e) => {
                if e.is_link_failure() {
                    self.resync_pending = true;
                }
                debug!("Intent not confirmed: {}", e);
            }
        }
    }

    /// Connects when down, polls status when up. Returns the next wake-up.
    async fn on_tick(&mut self) -> Instant {
        if self.manager.state().is_open() {
            let query = Frame::from(&Command::QueryStatus);
            match self.manager.exchange(&query).await {
                Ok(_) if self.resync_pending => self.replay().await,
                Ok(_) => {}
                Err(e) => debug!("Status poll failed: {}", e),
            }
        } else if self.manager.connect().await.is_ok() {
            self.replay().await;
        }

        if self.manager.state().is_open() {
            Instant::now() + self.status_interval
        } else {
            let delay = self.manager.next_retry_delay();
            debug!("Next connection attempt in {:?}", delay);
            Instant::now() + delay
        }
    }

    /// Resends the intended state, stopping at the first failure.
    async fn replay(&mut self) {
        self.resync_pending = false;
        let commands = self.reconciler.on_reconnect();
        if commands.is_empty() {
            return;
        }

        info!("Restoring intended state ({} commands)", commands.len());
        for command in commands {
            if let Err(e) = self.manager.exchange(&Frame::from(&command)).await {
                warn!("Replay of {} failed: {}", command, e);
                if e.is_link_failure() {
                    self.resync_pending = true;
                }
                break;
            }
        }
    }
}

/// Spawns a worker on the current runtime.
pub fn spawn<C>(connector: C, config: LinkConfig) -> (LinkHandle, JoinHandle<()>)
where
    C: Connector + 'static,
{
    let (worker, handle) = LinkWorker::new(connector, config);
    (handle, tokio::spawn(worker.run()))
}
