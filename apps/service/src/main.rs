use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use logger::LevelFilter;
use tracing::info;

use upwatch_service::config::Config;
use upwatch_service::database::models::TargetId;
use upwatch_service::orchestrator::{NewTarget, Orchestrator};

#[derive(Parser, Debug)]
#[command(name = "upwatch")]
#[command(author, version, about = "HTTP uptime monitoring with webhook alerts", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor every active target until Ctrl+C
    Run,
    /// Trim check history now and print how many targets were trimmed
    Cleanup,
    /// Print the effective configuration
    Config,
    /// Register a target and probe it once
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Accepted status codes, comma separated
        #[arg(long, default_value = "200")]
        accepted: String,
        /// Slack, Discord or Teams incoming webhook
        #[arg(long)]
        webhook: Option<String>,
    },
    /// List targets with their latest status
    List,
    /// Print 24h and 7d uptime of a target as JSON
    Stats { id: TargetId },
    /// Delete a target and its history
    Remove { id: TargetId },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init(LevelFilter::INFO);

    let args = Args::parse();
    let config = Config::from_config(args.config.as_ref())?;

    if let Command::Config = args.command {
        print!("{config}");
        return Ok(());
    }

    let orchestrator = Orchestrator::open(config).await?;
    let admin = orchestrator.admin();

    match args.command {
        Command::Run => orchestrator.run().await?,
        Command::Cleanup => {
            let trimmed = admin.trigger_cleanup().await?;
            println!("Trimmed {trimmed} target(s), keeping {} checks each", admin.max_history());
        }
        Command::Config => {}
        Command::Add { name, url, category, description, accepted, webhook } => {
            let new = NewTarget {
                name,
                url,
                category,
                description,
                accepted_status_codes: accepted,
                webhook_url: webhook,
            };
            let (target, check) = admin.create_target(new).await?;
            info!(target_id = ?target.id, "Target registered");
            println!(
                "#{} {} -> {} ({}, {})",
                target.id.unwrap_or_default(),
                target.name,
                if check.is_up { "UP" } else { "DOWN" },
                check.status_code,
                check.response_time_label()
            );
        }
        Command::List => {
            let latest = admin.latest_statuses().await?;
            for target in admin.list_targets().await? {
                let status = latest
                    .iter()
                    .find(|check| Some(check.target_id) == target.id)
                    .map(|check| {
                        format!(
                            "{} ({}, {})",
                            if check.is_up { "UP" } else { "DOWN" },
                            check.status_code,
                            check.response_time_label()
                        )
                    })
                    .unwrap_or_else(|| "PENDING".to_string());
                println!(
                    "#{:<4} {:<24} {:<8} {:<40} {}",
                    target.id.unwrap_or_default(),
                    target.name,
                    if target.active { "active" } else { "paused" },
                    target.url,
                    status
                );
            }
            println!("{} checks stored", admin.total_checks().await?);
        }
        Command::Stats { id } => {
            let stats = admin.stats(id).await?;
            println!("{}", serde_json::to_string_pretty(&stats.rounded())?);
        }
        Command::Remove { id } => {
            admin.delete_target(id).await?;
            println!("Target {id} removed");
        }
    }

    Ok(())
}
