// src/bin/cookq.rs
use anyhow::Result;
use clap::{Arg, ArgAction, Command};

mod commands;
use commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let app = Command::new("cookq")
        .version(env!("CARGO_PKG_VERSION"))
        .about("CookQ - Job distribution queue for the Cook-My-List scraper engine")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("broker")
                .about("Run the queue broker")
                .arg(Arg::new("intake")
                    .short('s')
                    .long("intake")
                    .value_name("ADDRESS")
                    .help("Intake (reply) bind address")
                    .default_value(cookq::DEFAULT_INTAKE_ADDRESS))
                .arg(Arg::new("distribution")
                    .short('p')
                    .long("distribution")
                    .value_name("ADDRESS")
                    .help("Distribution (push) bind address")
                    .default_value(cookq::DEFAULT_DISTRIBUTION_ADDRESS)),
        )
        .subcommand(
            Command::new("work")
                .about("Run pull workers against a running broker")
                .arg(Arg::new("distribution")
                    .short('c')
                    .long("connect")
                    .value_name("ADDRESS")
                    .help("Distribution address to pull jobs from")
                    .default_value(cookq::DEFAULT_DISTRIBUTION_ADDRESS))
                .arg(Arg::new("count")
                    .short('n')
                    .long("count")
                    .value_name("NUMBER")
                    .help("Number of workers")
                    .default_value("1")),
        )
        .subcommand(
            Command::new("workers")
                .about("Run the broker and a local worker pool in one process")
                .arg(Arg::new("intake")
                    .short('s')
                    .long("intake")
                    .value_name("ADDRESS")
                    .help("Intake (reply) bind address")
                    .default_value(cookq::DEFAULT_INTAKE_ADDRESS))
                .arg(Arg::new("max-workers")
                    .short('m')
                    .long("max-workers")
                    .value_name("NUMBER")
                    .help("Worker count (default: available CPU cores)")),
        )
        .subcommand(
            Command::new("enqueue")
                .about("Enqueue recipe urls")
                .arg(Arg::new("intake")
                    .short('c')
                    .long("connect")
                    .value_name("ADDRESS")
                    .help("Broker intake address")
                    .default_value(cookq::DEFAULT_INTAKE_ADDRESS))
                .arg(Arg::new("urls-file")
                    .short('f')
                    .long("urls-file")
                    .value_name("PATH")
                    .help("JSON file holding a list of recipe urls"))
                .arg(Arg::new("urls")
                    .value_name("URL")
                    .action(ArgAction::Append)),
        );

    match app.get_matches().subcommand() {
        Some(("broker", matches)) => broker_command(matches).await,
        Some(("work", matches)) => work_command(matches).await,
        Some(("workers", matches)) => workers_command(matches).await,
        Some(("enqueue", matches)) => enqueue_command(matches).await,
        _ => Ok(()),
    }
}
