//! Fire-and-forget log delivery
//!
//! Two paths exist. [`DeliveryChannel::send`] starts an asynchronous request
//! and returns at once; it is used while the page is known to stay alive.
//! [`DeliveryChannel::send_unload_safe`] hands the payload to a beacon queue
//! owned by a dedicated worker thread, so the request is still attempted after
//! the tracker that issued it is gone. When the beacon worker is unavailable
//! the payload falls back to a keep-alive request on the async runtime.
//!
//! Neither path retries or reports the server's answer to the caller. Errors
//! returned here only cover what can be known synchronously.

use std::cell::{Cell, RefCell};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use reqwest::header::{CONNECTION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::InstrumentConfig;
use crate::types::{Delivery, DeliveryMode};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to encode payload: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with status {0}")]
    Status(u16),

    #[error("Beacon queue is closed")]
    QueueClosed,

    #[error("No async runtime available for background requests")]
    NoRuntime,
}

pub trait DeliveryChannel {
    /// Best-effort asynchronous POST
    fn send(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError>;

    /// POST that is attempted even if the page is destroyed right after
    fn send_unload_safe(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError>;
}

impl<C: DeliveryChannel + ?Sized> DeliveryChannel for &C {
    fn send(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        (**self).send(path, body)
    }

    fn send_unload_safe(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        (**self).send_unload_safe(path, body)
    }
}

/// Hand a machine delivery to the channel on the path its mode requires
pub fn dispatch<C: DeliveryChannel + ?Sized>(
    channel: &C,
    delivery: &Delivery,
) -> Result<(), DeliveryError> {
    let path = delivery.record.path();
    let body = delivery.record.body()?;
    match delivery.mode {
        DeliveryMode::Standard => channel.send(path, body),
        DeliveryMode::UnloadSafe => channel.send_unload_safe(path, body),
    }
}

// ============================================================================
// HTTP channel
// ============================================================================

enum BeaconCommand {
    Post { url: String, body: Vec<u8> },
    Shutdown,
}

/// Worker thread that drains queued beacons.
///
/// Commands are processed in order, so every payload queued before shutdown is
/// attempted before the thread exits. Dropping the queue waits at most
/// `drain_limit` for that; a worker still busy after it is detached and keeps
/// draining for as long as the process lives.
struct BeaconQueue {
    sender: mpsc::Sender<BeaconCommand>,
    worker: Option<JoinHandle<()>>,
    exited: mpsc::Receiver<()>,
    drain_limit: Duration,
}

impl BeaconQueue {
    fn spawn(timeout: Duration, drain_limit: Duration) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<BeaconCommand>();
        // Never sent on; disconnects when the worker's closure returns.
        let (exit_guard, exited) = mpsc::channel::<()>();

        let worker = thread::Builder::new()
            .name("attn-beacon".into())
            .spawn(move || {
                let _exit_guard = exit_guard;
                let client = match reqwest::blocking::Client::builder().timeout(timeout).build() {
                    Ok(client) => client,
                    Err(err) => {
                        warn!(error = %err, "beacon worker could not build HTTP client");
                        return;
                    }
                };

                while let Ok(command) = receiver.recv() {
                    match command {
                        BeaconCommand::Post { url, body } => {
                            let result = client
                                .post(&url)
                                .header(CONTENT_TYPE, "application/json")
                                .body(body)
                                .send();
                            match result {
                                Ok(resp) if resp.status().is_success() => {}
                                Ok(resp) => {
                                    debug!(%url, status = resp.status().as_u16(), "beacon rejected")
                                }
                                Err(err) => debug!(%url, error = %err, "beacon failed"),
                            }
                        }
                        BeaconCommand::Shutdown => break,
                    }
                }

                info!("beacon worker shutting down");
            })?;

        Ok(Self {
            sender,
            worker: Some(worker),
            exited,
            drain_limit,
        })
    }

    /// Queue a payload, handing it back if the worker is gone
    fn enqueue(&self, url: String, body: Vec<u8>) -> Result<(), (String, Vec<u8>)> {
        self.sender
            .send(BeaconCommand::Post { url, body })
            .map_err(|mpsc::SendError(command)| match command {
                BeaconCommand::Post { url, body } => (url, body),
                BeaconCommand::Shutdown => (String::new(), Vec::new()),
            })
    }
}

impl Drop for BeaconQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(BeaconCommand::Shutdown);
        let Some(worker) = self.worker.take() else {
            return;
        };
        match self.exited.recv_timeout(self.drain_limit) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                debug!(limit_ms = self.drain_limit.as_millis() as u64, "beacon worker still draining, detaching");
            }
            _ => {
                if worker.join().is_err() {
                    warn!("beacon worker panicked");
                }
            }
        }
    }
}

/// Delivery over HTTP to the study backend.
///
/// `send` runs on the tokio runtime when one is available and otherwise goes
/// through the beacon worker. Dropping the channel blocks for at most one
/// `request_timeout_ms` while queued beacons drain.
pub struct HttpChannel {
    base_url: String,
    client: reqwest::Client,
    runtime: Option<Handle>,
    beacon: Option<BeaconQueue>,
}

impl HttpChannel {
    /// Build a channel using the ambient tokio runtime, if any
    pub fn new(config: &InstrumentConfig) -> Result<Self, DeliveryError> {
        Self::build(config, Handle::try_current().ok())
    }

    /// Build a channel that spawns requests on `runtime`
    pub fn with_runtime(config: &InstrumentConfig, runtime: Handle) -> Result<Self, DeliveryError> {
        Self::build(config, Some(runtime))
    }

    fn build(config: &InstrumentConfig, runtime: Option<Handle>) -> Result<Self, DeliveryError> {
        Self::build_with(config, runtime, true)
    }

    fn build_with(
        config: &InstrumentConfig,
        runtime: Option<Handle>,
        with_beacon: bool,
    ) -> Result<Self, DeliveryError> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let beacon = if with_beacon {
            match BeaconQueue::spawn(timeout, timeout) {
                Ok(queue) => Some(queue),
                Err(err) => {
                    warn!(error = %err, "beacon worker unavailable, unload-safe sends use keep-alive requests");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            client,
            runtime,
            beacon,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Perform one POST and report the outcome.
    ///
    /// This is the only place a delivery result is observable; background
    /// sends call it and drop the result.
    pub async fn post(
        client: &reqwest::Client,
        url: &str,
        body: Vec<u8>,
        keep_alive: bool,
    ) -> Result<(), DeliveryError> {
        let mut request = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        if keep_alive {
            request = request.header(CONNECTION, "keep-alive");
        }

        let resp = request.send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status(resp.status().as_u16()))
        }
    }

    fn spawn_post(&self, url: String, body: Vec<u8>) -> Result<(), DeliveryError> {
        let runtime = self.runtime.as_ref().ok_or(DeliveryError::NoRuntime)?;
        let client = self.client.clone();
        runtime.spawn(async move {
            if let Err(err) = Self::post(&client, &url, body, false).await {
                debug!(%url, error = %err, "log delivery dropped");
            }
        });
        Ok(())
    }

    /// Keep-alive request on the runtime's blocking pool.
    ///
    /// Unlike an async task, blocking work is waited for when the runtime
    /// shuts down, so the request outlives the caller.
    fn spawn_keep_alive(&self, url: String, body: Vec<u8>) -> Result<(), DeliveryError> {
        let runtime = self.runtime.as_ref().ok_or(DeliveryError::NoRuntime)?;
        let handle = runtime.clone();
        let client = self.client.clone();
        runtime.spawn_blocking(move || {
            if let Err(err) = handle.block_on(Self::post(&client, &url, body, true)) {
                debug!(%url, error = %err, "keep-alive delivery dropped");
            }
        });
        Ok(())
    }
}

impl DeliveryChannel for HttpChannel {
    fn send(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        let url = self.url(path);
        if self.runtime.is_some() {
            return self.spawn_post(url, body);
        }
        match &self.beacon {
            Some(queue) => queue.enqueue(url, body).map_err(|_| DeliveryError::QueueClosed),
            None => Err(DeliveryError::NoRuntime),
        }
    }

    fn send_unload_safe(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        let url = self.url(path);
        let (url, body) = match &self.beacon {
            Some(queue) => match queue.enqueue(url, body) {
                Ok(()) => return Ok(()),
                Err(rejected) => rejected,
            },
            None => (url, body),
        };
        debug!(%url, "beacon unavailable, falling back to keep-alive request");
        self.spawn_keep_alive(url, body)
    }
}

impl std::fmt::Debug for HttpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChannel")
            .field("base_url", &self.base_url)
            .field("runtime", &self.runtime.is_some())
            .field("beacon", &self.beacon.is_some())
            .finish()
    }
}

// ============================================================================
// Recording channel
// ============================================================================

/// One payload captured by [`RecordingChannel`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentRecord {
    pub mode: DeliveryMode,
    pub path: String,
    pub body: serde_json::Value,
}

/// Channel that keeps every payload in memory instead of sending it
#[derive(Debug, Default)]
pub struct RecordingChannel {
    sent: RefCell<Vec<SentRecord>>,
    failing: Cell<bool>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail, as an unreachable backend would
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.borrow().clone()
    }

    pub fn take(&self) -> Vec<SentRecord> {
        std::mem::take(&mut *self.sent.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.sent.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.borrow().is_empty()
    }

    fn record(&self, mode: DeliveryMode, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        if self.failing.get() {
            return Err(DeliveryError::QueueClosed);
        }
        let body = serde_json::from_slice(&body)?;
        self.sent.borrow_mut().push(SentRecord {
            mode,
            path: path.to_string(),
            body,
        });
        Ok(())
    }
}

impl DeliveryChannel for RecordingChannel {
    fn send(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        self.record(DeliveryMode::Standard, path, body)
    }

    fn send_unload_safe(&self, path: &str, body: Vec<u8>) -> Result<(), DeliveryError> {
        self.record(DeliveryMode::UnloadSafe, path, body)
    }
}
