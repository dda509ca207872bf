// src/broker.rs
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::{CyclePolicy, QueueConfig};
use crate::error::QueueError;
use crate::transport::{Context, PushSocket, RepSocket, ReplyHandle};

// The broker uses a REP socket for intake instead of a subscriber, so it can
// block producers from enqueueing more jobs than the workers can process: a
// producer is only acknowledged once its job has been handed to the
// distribution channel.

/// Mediates between producers and workers. Owns the intake (reply) and
/// distribution (push) endpoints; runs one intake request per cycle.
pub struct QueueBroker {
    intake: RepSocket,
    distribution: PushSocket,
    sleep_timeout: std::time::Duration,
    cycle_policy: CyclePolicy,
    shutdown: CancellationToken,
}

impl QueueBroker {
    /// Binds both endpoints and enters the `Listening` state.
    pub async fn bind(ctx: &Context, config: &QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let intake = RepSocket::bind(ctx, &config.intake_address, config.intake_hwm).await?;
        info!(address = %intake.address(), "listening on intake address");
        let distribution =
            PushSocket::bind(ctx, &config.distribution_address, config.distribution_hwm).await?;
        info!(address = %distribution.address(), "listening on distribution address");
        Ok(Self {
            intake,
            distribution,
            sleep_timeout: config.sleep_timeout,
            cycle_policy: config.cycle_policy,
            shutdown: CancellationToken::new(),
        })
    }

    /// Resolved intake address; useful when bound to an ephemeral port.
    pub fn intake_address(&self) -> &str {
        self.intake.address()
    }

    /// Resolved distribution address, for workers starting in-process.
    pub fn distribution_address(&self) -> &str {
        self.distribution.address()
    }

    /// Token that stops the run loop. Cancellation is observed between
    /// cycles; an in-flight hand-off is abandoned, never half-acknowledged.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs intake cycles until the shutdown token fires or, under
    /// [`CyclePolicy::Fatal`], a cycle fails.
    pub async fn run(mut self) -> Result<(), QueueError> {
        info!("starting queue broker");
        let shutdown = self.shutdown.clone();
        let result = loop {
            let request = tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                request = self.intake.recv() => request,
            };
            let outcome = match request {
                Ok((job, reply)) => self.dispatch(job, reply).await,
                Err(e) => Err(e),
            };
            if let Err(e) = outcome {
                match self.cycle_policy {
                    CyclePolicy::Continue => error!(error = %e, "broker cycle failed"),
                    CyclePolicy::Fatal => {
                        error!(error = %e, "queue broker interrupted by error");
                        break Err(e);
                    }
                }
            }
        };
        self.disconnect();
        result
    }

    /// One `Distributing` + `Acknowledging` step: hand the job to the
    /// distribution channel, backing off while it is at capacity, then echo
    /// the job back to the producer.
    async fn dispatch(&mut self, job: Value, reply: ReplyHandle) -> Result<(), QueueError> {
        debug!(%job, "processing job");
        loop {
            if self.distribution.try_send(&job)? {
                break;
            }
            trace!("waiting for the distribution channel to become available");
            tokio::select! {
                // Abandon the hand-off on shutdown; the producer is left
                // unacknowledged rather than lied to.
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.sleep_timeout) => {}
            }
        }
        reply.send(&job)
    }

    fn disconnect(&mut self) {
        self.intake.close();
        self.distribution.close();
        info!("queue broker stopped");
    }
}
