// src/bin/commands/mod.rs
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::ArgMatches;
use colored::*;
use futures::future::join_all;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use cookq::{
    start_worker_pool, Context, GetRecipeHandler, Job, JobHandler, QueueBroker, QueueClient,
    QueueConfig, QueueRunner, RecipeFetcher, WorkerOptions,
};

/// Stand-in fetcher: the scraper client is an external collaborator, so the
/// stock binary only logs what it would fetch.
struct LogFetcher;

#[async_trait]
impl RecipeFetcher for LogFetcher {
    async fn fetch(&self, recipe_url: &str) -> Result<()> {
        info!(recipe_url, "fetching recipe");
        Ok(())
    }
}

fn banner(role: &str) {
    println!("{}", format!("🚀 Starting CookQ {role}...").green().bold());
    println!(
        "Host: {} (pid {})",
        gethostname::gethostname().to_string_lossy(),
        std::process::id()
    );
    println!("Started at: {}", chrono::Utc::now().to_rfc3339());
}

// Run the queue broker
pub async fn broker_command(matches: &ArgMatches) -> Result<()> {
    let intake = matches.get_one::<String>("intake").unwrap();
    let distribution = matches.get_one::<String>("distribution").unwrap();

    let ctx = Context::new();
    let config = QueueConfig::new(intake, distribution);
    let broker = QueueBroker::bind(&ctx, &config).await?;

    banner("broker");
    println!("Intake: {}", broker.intake_address());
    println!("Distribution: {}", broker.distribution_address());
    println!("{}", "✅ Broker started. Press Ctrl+C to stop.".green());

    let shutdown = broker.shutdown_token();
    let mut run = tokio::spawn(broker.run());

    tokio::select! {
        _ = signal::ctrl_c() => {
            println!("\n{}", "🛑 Shutting down broker...".yellow());
            shutdown.cancel();
            (&mut run).await??;
        }
        result = &mut run => result??,
    }
    println!("{}", "✅ Broker stopped.".green());
    Ok(())
}

// Run pull workers against a running broker
pub async fn work_command(matches: &ArgMatches) -> Result<()> {
    let address = matches.get_one::<String>("distribution").unwrap();
    let count: usize = matches
        .get_one::<String>("count")
        .unwrap()
        .parse()
        .unwrap_or(1);

    let ctx = Context::new();
    let shutdown = CancellationToken::new();
    let handler: Arc<dyn JobHandler> = Arc::new(GetRecipeHandler::new(LogFetcher));

    banner("workers");
    println!("Distribution: {address}");
    println!("Concurrency: {count}");

    let pool = start_worker_pool(
        &ctx,
        address,
        handler,
        count,
        &WorkerOptions {
            shutdown: shutdown.child_token(),
            ..Default::default()
        },
    );
    println!("{}", "✅ Workers started. Press Ctrl+C to stop.".green());

    signal::ctrl_c().await?;
    println!("\n{}", "🛑 Shutting down workers...".yellow());
    shutdown.cancel();
    for outcome in join_all(pool).await {
        if let Ok(Err(e)) = outcome {
            eprintln!("worker failed: {e}");
        }
    }
    println!("{}", "✅ Workers stopped.".green());
    Ok(())
}

// Run the broker and a local worker pool in one process
pub async fn workers_command(matches: &ArgMatches) -> Result<()> {
    let intake = matches.get_one::<String>("intake").unwrap();

    let mut config = QueueConfig::local(intake);
    if let Some(max_workers) = matches.get_one::<String>("max-workers") {
        config.max_workers = max_workers.parse().unwrap_or(config.max_workers);
    }

    let ctx = Context::new();
    let handler: Arc<dyn JobHandler> = Arc::new(GetRecipeHandler::new(LogFetcher));
    let runner = QueueRunner::bind(&ctx, &config, handler).await?;

    banner("engine");
    println!("Intake: {}", runner.intake_address());
    println!("Distribution: {}", config.distribution_address);
    println!("Workers: {}", config.max_workers);
    println!("{}", "✅ Engine started. Press Ctrl+C to stop.".green());

    let shutdown = runner.shutdown_token();
    let mut run = tokio::spawn(runner.run());

    tokio::select! {
        _ = signal::ctrl_c() => {
            println!("\n{}", "🛑 Shutting down engine...".yellow());
            shutdown.cancel();
            (&mut run).await??;
        }
        result = &mut run => result??,
    }
    println!("{}", "✅ Engine stopped.".green());
    Ok(())
}

// Enqueue recipe urls
pub async fn enqueue_command(matches: &ArgMatches) -> Result<()> {
    let intake = matches.get_one::<String>("intake").unwrap();

    let mut recipe_urls: Vec<String> = Vec::new();
    if let Some(path) = matches.get_one::<String>("urls-file") {
        let raw = std::fs::read_to_string(path)?;
        recipe_urls = serde_json::from_str(&raw)?;
        println!("loaded recipe urls from {path}");
    }
    if let Some(urls) = matches.get_many::<String>("urls") {
        recipe_urls.extend(urls.cloned());
    }
    if recipe_urls.is_empty() {
        println!("{}", "ℹ️  No recipe urls to enqueue.".blue());
        return Ok(());
    }

    let ctx = Context::new();
    let mut client = QueueClient::new(&ctx, intake)?;
    client.connect().await?;

    let count = recipe_urls.len();
    for (i, url) in recipe_urls.iter().enumerate() {
        println!(" -> enqueueing recipe {} of {count} -> {url}", i + 1);
        client
            .send(&Job::new().set("recipe_url", url.as_str()))
            .await?;
    }
    client.close();
    println!("{}", format!("✅ Enqueued {count} recipes.").green());
    Ok(())
}
