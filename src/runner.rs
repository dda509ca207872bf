// src/runner.rs
use std::sync::Arc;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::QueueBroker;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::job::JobHandler;
use crate::transport::Context;
use crate::worker::{PullerWorker, WorkerOptions};

/// Spawns `count` workers against one distribution address, all sharing one
/// handler. Each worker gets a child of `options.shutdown`, so cancelling the
/// caller's token stops the whole pool.
pub fn start_worker_pool(
    ctx: &Context,
    pull_address: &str,
    handler: Arc<dyn JobHandler>,
    count: usize,
    options: &WorkerOptions,
) -> Vec<JoinHandle<Result<(), QueueError>>> {
    info!(address = %pull_address, count, "starting worker pool");
    (0..count)
        .map(|i| {
            let worker_id = match &options.worker_id {
                Some(base) => format!("{base}-{i}"),
                None => format!("worker-{i}"),
            };
            let worker = PullerWorker::with_options(
                ctx,
                pull_address,
                handler.clone(),
                WorkerOptions {
                    worker_id: Some(worker_id),
                    hwm: options.hwm,
                    wait_timeout: options.wait_timeout,
                    shutdown: options.shutdown.child_token(),
                },
            );
            tokio::spawn(worker.run())
        })
        .collect()
}

/// Broker plus worker pool in one process: TCP intake for remote producers,
/// in-process distribution to `config.max_workers` pullers.
pub struct QueueRunner {
    broker: QueueBroker,
    workers: Vec<JoinHandle<Result<(), QueueError>>>,
    shutdown: CancellationToken,
}

impl QueueRunner {
    pub async fn bind(
        ctx: &Context,
        config: &QueueConfig,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Self, QueueError> {
        let broker = QueueBroker::bind(ctx, config).await?;
        let shutdown = broker.shutdown_token();
        let workers = start_worker_pool(
            ctx,
            broker.distribution_address(),
            handler,
            config.max_workers,
            &WorkerOptions {
                wait_timeout: config.wait_timeout,
                shutdown: shutdown.child_token(),
                ..Default::default()
            },
        );
        Ok(Self {
            broker,
            workers,
            shutdown,
        })
    }

    /// Resolved intake address; useful when bound to an ephemeral port.
    pub fn intake_address(&self) -> &str {
        self.broker.intake_address()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Runs the broker to completion, then winds the pool down with it,
    /// whether the broker stopped orderly or died on a fatal cycle.
    pub async fn run(self) -> Result<(), QueueError> {
        let result = self.broker.run().await;
        self.shutdown.cancel();
        for outcome in join_all(self.workers).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "worker stopped with error"),
                Err(e) => error!(error = %e, "worker task panicked"),
            }
        }
        result
    }
}
