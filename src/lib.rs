//! Lightweight job distribution queue for a recipe scraper engine.
//!
//! A [`QueueBroker`] accepts jobs from any number of producers over a
//! request/reply channel and relays them to a pool of workers over a
//! push/pull channel. The broker acknowledges a producer only after the job
//! has been handed to the distribution channel, and every socket carries a
//! high-water-mark (default 1), so producers block instead of overwhelming
//! workers.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cookq::{Context, Job, JobHandler, QueueBroker, QueueClient, QueueConfig};
//!
//! struct PrintHandler;
//!
//! #[async_trait::async_trait]
//! impl JobHandler for PrintHandler {
//!     async fn handle(&self, job: Job) -> anyhow::Result<()> {
//!         println!("{job}");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = Context::new();
//!     let config = QueueConfig::local("tcp://127.0.0.1:5000");
//!     let broker = QueueBroker::bind(&ctx, &config).await?;
//!     let _workers = cookq::start_worker_pool(
//!         &ctx,
//!         broker.distribution_address(),
//!         Arc::new(PrintHandler),
//!         4,
//!         &Default::default(),
//!     );
//!     tokio::spawn(broker.run());
//!
//!     let mut client = QueueClient::new(&ctx, "tcp://127.0.0.1:5000")?;
//!     client.connect().await?;
//!     client
//!         .send(&Job::new().set("recipe_url", "https://example.com/r/1"))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod client;
pub mod config;
pub mod error;
pub mod job;
pub mod recipe;
pub mod runner;
pub mod transport;
pub mod worker;

pub use broker::QueueBroker;
pub use client::QueueClient;
pub use config::{
    CyclePolicy, QueueConfig, DEFAULT_DISTRIBUTION_ADDRESS, DEFAULT_INTAKE_ADDRESS,
    LOCAL_DISTRIBUTION_ADDRESS,
};
pub use error::QueueError;
pub use job::{Job, JobHandler};
pub use recipe::{GetRecipeHandler, RecipeFetcher};
pub use runner::{start_worker_pool, QueueRunner};
pub use transport::{Context, Endpoint, PullSocket, PushSocket, RepSocket, ReplyHandle, ReqSocket};
pub use worker::{PullerWorker, WorkerOptions};
