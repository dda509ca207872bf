// src/transport/pipeline.rs
//! The pipeline pattern: a PUSH socket distributes messages over connected
//! pullers, one receiver per message; PULL sockets dequeue them. Capacity is
//! bounded by the high-water-mark, and a push is "not ready" until at least
//! one puller is attached, so backpressure reaches the broker before the first
//! worker ever shows up.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{Context, SharedReceiver};
use super::endpoint::Endpoint;
use super::wire::{self, ReadError};
use crate::error::QueueError;

/// Distribution-side push socket, bound by the broker.
pub struct PushSocket {
    ctx: Context,
    address: String,
    inner: PushInner,
    inproc_name: Option<String>,
    token: CancellationToken,
}

enum PushInner {
    Tcp(Arc<TcpPushShared>),
    Inproc {
        tx: mpsc::Sender<Vec<u8>>,
        pullers: Arc<AtomicUsize>,
    },
}

struct TcpPushShared {
    outboxes: Mutex<Vec<mpsc::Sender<Vec<u8>>>>,
    cursor: AtomicUsize,
    hwm: usize,
}

impl TcpPushShared {
    fn try_send(&self, payload: Vec<u8>) -> bool {
        let mut outboxes = self.outboxes.lock().unwrap();
        if outboxes.is_empty() {
            return false;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut payload = payload;
        for i in 0..outboxes.len() {
            let outbox = &outboxes[(start + i) % outboxes.len()];
            match outbox.try_send(payload) {
                Ok(()) => return true,
                Err(TrySendError::Full(p)) | Err(TrySendError::Closed(p)) => payload = p,
            }
        }
        // Every outbox refused; forget connections whose worker went away.
        outboxes.retain(|outbox| !outbox.is_closed());
        false
    }
}

impl PushSocket {
    pub async fn bind(ctx: &Context, address: &str, hwm: usize) -> Result<Self, QueueError> {
        let token = CancellationToken::new();
        match Endpoint::parse(address)? {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(&addr)
                    .await
                    .map_err(|e| QueueError::connection(address, e))?;
                let local = listener
                    .local_addr()
                    .map_err(|e| QueueError::connection(address, e))?;
                let shared = Arc::new(TcpPushShared {
                    outboxes: Mutex::new(Vec::new()),
                    cursor: AtomicUsize::new(0),
                    hwm: hwm.max(1),
                });
                tokio::spawn(accept_pullers(listener, shared.clone(), token.clone()));
                Ok(Self {
                    ctx: ctx.clone(),
                    address: format!("tcp://{local}"),
                    inner: PushInner::Tcp(shared),
                    inproc_name: None,
                    token,
                })
            }
            Endpoint::Inproc(name) => {
                let (tx, pullers) = ctx.bind_pipeline(address, &name, hwm.max(1))?;
                Ok(Self {
                    ctx: ctx.clone(),
                    address: address.to_string(),
                    inner: PushInner::Inproc { tx, pullers },
                    inproc_name: Some(name),
                    token,
                })
            }
        }
    }

    /// The bound address, with `tcp://host:0` resolved to the actual port.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Non-blocking readiness probe and send in one step.
    ///
    /// `Ok(false)` means the channel is at its mark or no puller is attached;
    /// the caller decides how to back off.
    pub fn try_send(&self, value: &Value) -> Result<bool, QueueError> {
        let payload = wire::encode(value)?;
        match &self.inner {
            PushInner::Tcp(shared) => Ok(shared.try_send(payload)),
            PushInner::Inproc { tx, pullers } => {
                if pullers.load(Ordering::Acquire) == 0 {
                    return Ok(false);
                }
                Ok(tx.try_send(payload).is_ok())
            }
        }
    }

    pub fn close(&mut self) {
        self.token.cancel();
        if let Some(name) = self.inproc_name.take() {
            self.ctx.unbind(&name);
        }
    }
}

impl Drop for PushSocket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_pullers(
    listener: TcpListener,
    shared: Arc<TcpPushShared>,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "worker connected");
                let (tx, rx) = mpsc::channel(shared.hwm);
                shared.outboxes.lock().unwrap().push(tx);
                let (_reader, writer) = stream.into_split();
                tokio::spawn(drain_outbox(writer, rx, peer, token.child_token()));
            }
            Err(e) => warn!(error = %e, "failed to accept worker connection"),
        }
    }
}

async fn drain_outbox(
    mut writer: OwnedWriteHalf,
    mut outbox: mpsc::Receiver<Vec<u8>>,
    peer: SocketAddr,
    token: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = outbox.recv() => next,
        };
        match next {
            Some(payload) => {
                if let Err(e) = wire::write_frame(&mut writer, &payload).await {
                    debug!(%peer, error = %e, "worker connection failed");
                    break;
                }
            }
            None => break,
        }
    }
}

/// Worker-side pull socket; long-lived, connected once at startup.
pub struct PullSocket {
    address: String,
    inner: PullInner,
    token: CancellationToken,
}

enum PullInner {
    Tcp(mpsc::Receiver<Result<Vec<u8>, QueueError>>),
    Inproc {
        rx: SharedReceiver,
        pullers: Arc<AtomicUsize>,
    },
}

impl PullSocket {
    pub async fn connect(ctx: &Context, address: &str, hwm: usize) -> Result<Self, QueueError> {
        let token = CancellationToken::new();
        match Endpoint::parse(address)? {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(&addr)
                    .await
                    .map_err(|e| QueueError::connection(address, e))?;
                let (tx, rx) = mpsc::channel(hwm.max(1));
                tokio::spawn(read_jobs(stream, tx, token.clone()));
                Ok(Self {
                    address: address.to_string(),
                    inner: PullInner::Tcp(rx),
                    token,
                })
            }
            Endpoint::Inproc(name) => {
                let (rx, pullers) = ctx.connect_pipeline(address, &name)?;
                pullers.fetch_add(1, Ordering::AcqRel);
                Ok(Self {
                    address: address.to_string(),
                    inner: PullInner::Inproc { rx, pullers },
                    token,
                })
            }
        }
    }

    /// Waits up to `wait` for the next message. An empty poll is `Ok(None)`,
    /// not an error.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<Option<Value>, QueueError> {
        match &mut self.inner {
            PullInner::Tcp(rx) => match tokio::time::timeout(wait, rx.recv()).await {
                Err(_) => Ok(None),
                Ok(None) => Err(QueueError::connection(
                    &self.address,
                    "distribution endpoint closed",
                )),
                Ok(Some(Ok(payload))) => wire::decode(&payload).map(Some),
                Ok(Some(Err(e))) => Err(e),
            },
            PullInner::Inproc { rx, .. } => {
                let rx = rx.clone();
                let next = tokio::time::timeout(wait, async move {
                    rx.lock().await.recv().await
                })
                .await;
                match next {
                    Err(_) => Ok(None),
                    Ok(None) => Err(QueueError::connection(
                        &self.address,
                        "distribution endpoint closed",
                    )),
                    Ok(Some(payload)) => wire::decode(&payload).map(Some),
                }
            }
        }
    }
}

impl Drop for PullSocket {
    fn drop(&mut self) {
        self.token.cancel();
        if let PullInner::Inproc { pullers, .. } = &self.inner {
            pullers.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

async fn read_jobs(
    stream: TcpStream,
    queue: mpsc::Sender<Result<Vec<u8>, QueueError>>,
    token: CancellationToken,
) {
    let (mut reader, _writer) = stream.into_split();
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = wire::read_frame(&mut reader) => frame,
        };
        match frame {
            // Backpressure: when the bounded queue is full this send parks the
            // reader, which in turn stops draining the TCP stream.
            Ok(payload) => {
                if queue.send(Ok(payload)).await.is_err() {
                    break;
                }
            }
            Err(ReadError::Closed) => break,
            Err(ReadError::TooLarge(length)) => {
                // The stream is desynchronized past an oversize frame.
                let _ = queue.send(Err(wire::too_large(length))).await;
                break;
            }
            Err(ReadError::Io(e)) => {
                debug!(error = %e, "distribution connection failed");
                break;
            }
        }
    }
}
