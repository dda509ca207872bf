// src/client.rs
use std::time::Duration;

use tracing::debug;

use crate::error::QueueError;
use crate::job::Job;
use crate::transport::{Context, ReqSocket};

/// Producer-side handle for synchronous job submission.
///
/// `send` blocks until the broker acknowledges, and the broker only
/// acknowledges once the job has been handed to the distribution channel, so
/// a client's throughput is coupled to worker capacity without the client
/// knowing how many workers exist.
pub struct QueueClient {
    socket: ReqSocket,
    intake_address: String,
}

impl QueueClient {
    pub fn new(ctx: &Context, intake_address: impl Into<String>) -> Result<Self, QueueError> {
        let intake_address = intake_address.into();
        Ok(Self {
            socket: ReqSocket::new(ctx, intake_address.clone())?,
            intake_address,
        })
    }

    pub async fn connect(&mut self) -> Result<(), QueueError> {
        debug!(address = %self.intake_address, "connecting to intake address");
        self.socket.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Submits a job and blocks until the broker acknowledges it.
    ///
    /// There is no timeout here: an unresponsive broker blocks the caller
    /// indefinitely. Prefer [`QueueClient::send_timeout`] when the broker is
    /// not under your control.
    ///
    /// The returned acknowledgement echoes the job; callers should not rely
    /// on its content beyond "the request succeeded".
    pub async fn send(&mut self, job: &Job) -> Result<Job, QueueError> {
        let ack = self.socket.request(&job.to_value()).await?;
        debug!(%ack, "job acknowledged");
        Job::from_value(ack)
    }

    /// Like [`QueueClient::send`], but gives up after `wait`.
    ///
    /// A timed-out request leaves the lockstep request channel in an unusable
    /// state, so the client disconnects itself; call [`QueueClient::connect`]
    /// again before the next send.
    pub async fn send_timeout(&mut self, job: &Job, wait: Duration) -> Result<Job, QueueError> {
        match tokio::time::timeout(wait, self.send(job)).await {
            Ok(result) => result,
            Err(_) => {
                self.close();
                Err(QueueError::AckTimeout(wait))
            }
        }
    }

    /// Releases the channel. Safe to call more than once.
    pub fn close(&mut self) {
        if self.socket.is_connected() {
            debug!(address = %self.intake_address, "closing intake connection");
        }
        self.socket.close();
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RepSocket;

    #[tokio::test]
    async fn send_before_connect_fails() {
        let ctx = Context::new();
        let mut client = QueueClient::new(&ctx, "tcp://127.0.0.1:5000").unwrap();
        let err = client.send(&Job::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotConnected));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let ctx = Context::new();
        let _rep = RepSocket::bind(&ctx, "inproc://intake", 1).await.unwrap();
        let mut client = QueueClient::new(&ctx, "inproc://intake").unwrap();
        client.connect().await.unwrap();
        client.close();
        client.close(); // idempotent
        let err = client.send(&Job::new()).await.unwrap_err();
        assert!(matches!(err, QueueError::NotConnected));
    }

    #[tokio::test]
    async fn unknown_scheme_fails_at_construction() {
        let ctx = Context::new();
        assert!(QueueClient::new(&ctx, "amqp://127.0.0.1:5000").is_err());
    }

    #[tokio::test]
    async fn send_timeout_disconnects_on_expiry() {
        let ctx = Context::new();
        // Bound but never served: the request sits unanswered.
        let _rep = RepSocket::bind(&ctx, "inproc://intake", 1).await.unwrap();
        let mut client = QueueClient::new(&ctx, "inproc://intake").unwrap();
        client.connect().await.unwrap();

        let job = Job::new().set("recipe_url", "https://example.com/r/1");
        let err = client
            .send_timeout(&job, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::AckTimeout(_)));
        assert!(!client.is_connected());
    }
}
