// src/worker.rs
use std::sync::Arc;
use std::time::Duration;

use nanoid::nanoid;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::QueueError;
use crate::job::{Job, JobHandler};
use crate::transport::{Context, PullSocket};

/// Per-worker knobs. The identity is only ever used in log lines, never for
/// routing.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Opaque label; auto-generated when `None`.
    pub worker_id: Option<String>,
    /// High-water-mark on the pull socket.
    pub hwm: usize,
    /// Poll window; an empty poll just loops.
    pub wait_timeout: Duration,
    pub shutdown: CancellationToken,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            worker_id: None,
            hwm: 1,
            wait_timeout: Duration::from_secs(5),
            shutdown: CancellationToken::new(),
        }
    }
}

/// Pulls one job at a time from the broker's distribution channel and feeds
/// it to the handler. A failing handler never takes the loop down; losing one
/// worker's current job is cheap, stalling the broker is not.
pub struct PullerWorker {
    ctx: Context,
    pull_address: String,
    worker_id: String,
    handler: Arc<dyn JobHandler>,
    hwm: usize,
    wait_timeout: Duration,
    shutdown: CancellationToken,
}

impl PullerWorker {
    pub fn new(
        ctx: &Context,
        pull_address: impl Into<String>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        Self::with_options(ctx, pull_address, handler, WorkerOptions::default())
    }

    pub fn with_options(
        ctx: &Context,
        pull_address: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            ctx: ctx.clone(),
            pull_address: pull_address.into(),
            worker_id: options
                .worker_id
                .unwrap_or_else(|| format!("worker-{}", nanoid!(8))),
            handler,
            hwm: options.hwm,
            wait_timeout: options.wait_timeout,
            shutdown: options.shutdown,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Connects once, then polls until shutdown. The connection is long-lived;
    /// if the distribution endpoint goes away the worker stops rather than
    /// reconnect.
    pub async fn run(self) -> Result<(), QueueError> {
        let mut queue = PullSocket::connect(&self.ctx, &self.pull_address, self.hwm).await?;
        info!(worker_id = %self.worker_id, address = %self.pull_address, "connected to pull address");
        let shutdown = self.shutdown.clone();
        loop {
            trace!(worker_id = %self.worker_id, "waiting for job");
            let polled = tokio::select! {
                _ = shutdown.cancelled() => break,
                polled = queue.recv_timeout(self.wait_timeout) => polled,
            };
            match polled {
                Ok(None) => continue,
                Ok(Some(value)) => self.process(value).await,
                Err(e) if e.is_recoverable() => {
                    warn!(worker_id = %self.worker_id, error = %e, "skipping undecodable job");
                }
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "worker interrupted by error");
                    return Err(e);
                }
            }
        }
        info!(worker_id = %self.worker_id, "worker stopped");
        Ok(())
    }

    async fn process(&self, value: serde_json::Value) {
        let job = match Job::from_value(value) {
            Ok(job) => job,
            Err(e) => {
                warn!(worker_id = %self.worker_id, error = %e, "discarding job payload");
                return;
            }
        };
        debug!(worker_id = %self.worker_id, "processing job");
        if let Err(e) = self.handler.handle(job.clone()).await {
            error!(worker_id = %self.worker_id, job = %job, error = ?e, "failed to process job");
        }
    }
}
