// src/transport/request.rs
//! The request pattern: REQ sockets issue one call at a time and block for the
//! reply; a REP socket fans in any number of callers and answers them one by
//! one.

use std::net::SocketAddr;

use serde_json::Value;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{Context, InprocRequest};
use super::endpoint::Endpoint;
use super::wire::{self, ReadError};
use crate::error::QueueError;

/// Producer-side request socket. Lockstep by construction: [`ReqSocket::request`]
/// writes one message and blocks for its reply, so at most one request is ever
/// in flight regardless of the configured mark.
pub struct ReqSocket {
    ctx: Context,
    address: String,
    endpoint: Endpoint,
    inner: Option<ReqInner>,
}

enum ReqInner {
    Tcp(TcpStream),
    Inproc(mpsc::Sender<InprocRequest>),
}

impl ReqSocket {
    pub fn new(ctx: &Context, address: impl Into<String>) -> Result<Self, QueueError> {
        let address = address.into();
        let endpoint = Endpoint::parse(&address)?;
        Ok(Self {
            ctx: ctx.clone(),
            address,
            endpoint,
            inner: None,
        })
    }

    pub async fn connect(&mut self) -> Result<(), QueueError> {
        let inner = match &self.endpoint {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|e| QueueError::connection(&self.address, e))?;
                ReqInner::Tcp(stream)
            }
            Endpoint::Inproc(name) => {
                ReqInner::Inproc(self.ctx.connect_request(&self.address, name)?)
            }
        };
        self.inner = Some(inner);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    /// Sends `value` and blocks until the peer replies.
    pub async fn request(&mut self, value: &Value) -> Result<Value, QueueError> {
        let inner = self.inner.as_mut().ok_or(QueueError::NotConnected)?;
        let payload = wire::encode(value)?;
        match inner {
            ReqInner::Tcp(stream) => {
                wire::write_frame(stream, &payload)
                    .await
                    .map_err(|e| QueueError::connection(&self.address, e))?;
                match wire::read_frame(stream).await {
                    Ok(reply) => wire::decode(&reply),
                    Err(ReadError::Closed) => Err(QueueError::connection(
                        &self.address,
                        "connection closed before the reply",
                    )),
                    Err(ReadError::TooLarge(length)) => Err(wire::too_large(length)),
                    Err(ReadError::Io(e)) => Err(QueueError::connection(&self.address, e)),
                }
            }
            ReqInner::Inproc(tx) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                tx.send((payload, reply_tx))
                    .await
                    .map_err(|_| QueueError::connection(&self.address, "reply endpoint is gone"))?;
                let reply = reply_rx.await.map_err(|_| {
                    QueueError::connection(&self.address, "reply endpoint dropped the request")
                })?;
                wire::decode(&reply)
            }
        }
    }

    pub fn close(&mut self) {
        self.inner = None;
    }
}

/// One accepted request: reply by sending exactly one value back.
///
/// Dropping the handle without replying leaves the caller to its own timeout;
/// the broker only does that on shutdown.
pub struct ReplyHandle {
    tx: oneshot::Sender<Vec<u8>>,
}

impl ReplyHandle {
    pub fn send(self, value: &Value) -> Result<(), QueueError> {
        let payload = wire::encode(value)?;
        self.tx.send(payload).map_err(|_| {
            QueueError::Cycle("producer went away before the acknowledgement".into())
        })
    }
}

/// Broker-side reply socket. Bound once; producers connect and their requests
/// are funneled into one bounded queue (capacity = high-water-mark).
pub struct RepSocket {
    ctx: Context,
    address: String,
    inner: RepInner,
    inproc_name: Option<String>,
    token: CancellationToken,
}

enum RepInner {
    Tcp(mpsc::Receiver<Result<(Value, ReplyHandle), QueueError>>),
    Inproc(mpsc::Receiver<InprocRequest>),
}

impl RepSocket {
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
                let (tx, rx) = mpsc::channel(hwm.max(1));
                tokio::spawn(accept_producers(listener, tx, token.clone()));
                Ok(Self {
                    ctx: ctx.clone(),
                    address: format!("tcp://{local}"),
                    inner: RepInner::Tcp(rx),
                    inproc_name: None,
                    token,
                })
            }
            Endpoint::Inproc(name) => {
                let rx = ctx.bind_request(address, &name, hwm)?;
                Ok(Self {
                    ctx: ctx.clone(),
                    address: address.to_string(),
                    inner: RepInner::Inproc(rx),
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

    /// Blocks until the next request arrives. Decode failures surface here as
    /// per-message errors; the offending producer connection is dropped.
    pub async fn recv(&mut self) -> Result<(Value, ReplyHandle), QueueError> {
        match &mut self.inner {
            RepInner::Tcp(rx) => match rx.recv().await {
                Some(item) => item,
                None => Err(QueueError::connection(&self.address, "intake endpoint closed")),
            },
            RepInner::Inproc(rx) => match rx.recv().await {
                Some((payload, reply_tx)) => {
                    let value = wire::decode(&payload)?;
                    Ok((value, ReplyHandle { tx: reply_tx }))
                }
                None => Err(QueueError::connection(&self.address, "intake endpoint closed")),
            },
        }
    }

    pub fn close(&mut self) {
        self.token.cancel();
        if let Some(name) = self.inproc_name.take() {
            self.ctx.unbind(&name);
        }
    }
}

impl Drop for RepSocket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_producers(
    listener: TcpListener,
    queue: mpsc::Sender<Result<(Value, ReplyHandle), QueueError>>,
    token: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "producer connected");
                let (reader, writer) = stream.into_split();
                tokio::spawn(serve_producer(
                    reader,
                    writer,
                    peer,
                    queue.clone(),
                    token.child_token(),
                ));
            }
            Err(e) => warn!(error = %e, "failed to accept producer connection"),
        }
    }
}

async fn serve_producer(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    peer: SocketAddr,
    queue: mpsc::Sender<Result<(Value, ReplyHandle), QueueError>>,
    token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = wire::read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(payload) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let item = wire::decode(&payload).map(|value| (value, ReplyHandle { tx: reply_tx }));
                let malformed = item.is_err();
                if queue.send(item).await.is_err() {
                    break;
                }
                if malformed {
                    // The request pattern is lockstep; without a decoded
                    // request there is nothing to reply to.
                    break;
                }
                match reply_rx.await {
                    Ok(reply) => {
                        if let Err(e) = wire::write_frame(&mut writer, &reply).await {
                            debug!(%peer, error = %e, "failed to write reply");
                            break;
                        }
                    }
                    // Reply handle dropped without an answer: shutdown.
                    Err(_) => break,
                }
            }
            Err(ReadError::Closed) => break,
            Err(ReadError::TooLarge(length)) => {
                let _ = queue.send(Err(wire::too_large(length))).await;
                break;
            }
            Err(ReadError::Io(e)) => {
                debug!(%peer, error = %e, "producer connection failed");
                break;
            }
        }
    }
}
