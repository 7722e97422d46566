//! `siloctl` — the CLI entry point.
//!
//! A thin wrapper around [`silo_core`]: parses the configuration file,
//! builds a [`silo_manager::SiloManager`], and dispatches to one of a
//! handful of subcommands. The core (reconciliation, watching, search) is
//! designed to run embedded in a host process; this binary exists so the
//! engine can be exercised and scripted standalone.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use silo_core::config;
use silo_core::models::SearchWeights;
use silo_core::search::{self, SiloSearchContext};
use silo_core::server;
use silo_core::silo_manager::SiloManager;

#[derive(Parser)]
#[command(
    name = "siloctl",
    about = "Local multi-silo document indexing and hybrid search engine",
    version
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and migrate every configured silo's database without
    /// starting watchers.
    Init,

    /// Print the status of every configured silo.
    List,

    /// Run one reconciliation pass for a silo and print a summary.
    Reconcile {
        /// Silo name, or omit to reconcile every configured silo.
        silo: Option<String>,
    },

    /// Run a hybrid search against one or all started silos.
    Search {
        query: String,

        /// Restrict the search to a single silo.
        #[arg(long)]
        silo: Option<String>,

        /// Maximum number of files to return.
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Named weight preset: balanced, semantic, keyword, or code.
        #[arg(long, default_value = "balanced")]
        weights: String,
    },

    /// Start the HTTP/MCP server, reconciling and watching every
    /// non-sleeping silo first.
    Serve,
}

fn default_config_path() -> PathBuf {
    config::default_user_data_dir().join("config.toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("silo_core=info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let cfg = config::load_config(&config_path)?;
    let user_data_dir = config::default_user_data_dir();

    match cli.command {
        Commands::Init => {
            let manager = Arc::new(SiloManager::new(user_data_dir));
            manager.start_all(&cfg).await?;
            for name in manager.silo_names().await {
                manager.stop_silo(&name).await?;
            }
            println!("Initialized {} silo(s).", cfg.silos.len());
        }

        Commands::List => {
            let manager = Arc::new(SiloManager::new(user_data_dir));
            manager.start_all(&cfg).await?;
            for name in manager.silo_names().await {
                let status = manager.status(&name).await?;
                println!(
                    "{:<20} {:<10} files={:<6} chunks={:<8} model={}{}",
                    status.name,
                    format!("{:?}", status.state).to_lowercase(),
                    status.file_count,
                    status.chunk_count,
                    status.resolved_model,
                    if status.model_mismatch { " (model mismatch)" } else { "" },
                );
                if let Some(err) = status.error_message {
                    println!("  error: {err}");
                }
            }
        }

        Commands::Reconcile { silo } => {
            let manager = Arc::new(SiloManager::new(user_data_dir));
            manager.start_all(&cfg).await?;
            let names = match silo {
                Some(name) => vec![name],
                None => manager.silo_names().await,
            };
            for name in names {
                manager.start_silo(&name).await?;
                let status = manager.status(&name).await?;
                println!(
                    "{name}: {} files, {} chunks",
                    status.file_count, status.chunk_count
                );
            }
        }

        Commands::Search {
            query,
            silo,
            limit,
            weights,
        } => {
            let weights = SearchWeights::by_name(&weights)
                .ok_or_else(|| anyhow::anyhow!("unknown weight preset: {weights}"))?;

            let manager = Arc::new(SiloManager::new(user_data_dir));
            manager.start_all(&cfg).await?;

            let names = match silo {
                Some(name) => vec![name],
                None => manager.silo_names().await,
            };
            if names.is_empty() {
                bail!("no silos configured");
            }

            let mut pools = Vec::new();
            let mut embedders = Vec::new();
            for name in &names {
                pools.push((name.clone(), manager.pool(name).await?));
                embedders.push(manager.embedder(name).await?);
            }
            let contexts: Vec<SiloSearchContext> = pools
                .iter()
                .zip(embedders.iter())
                .map(|((name, pool), embedder)| SiloSearchContext {
                    name,
                    pool,
                    embedder: embedder.as_ref(),
                })
                .collect();

            let results = search::search(&contexts, &query, weights, limit).await?;
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{:>2}. [{}] {} (score={:.4}, match={:?})",
                    rank + 1,
                    result.silo_name,
                    result.file_path,
                    result.score,
                    result.match_type
                );
                if let Some(top) = result.chunks.first() {
                    let preview: String = top.text.chars().take(120).collect();
                    println!("     {}", preview.replace('\n', " "));
                }
            }
        }

        Commands::Serve => {
            let manager = Arc::new(SiloManager::new(user_data_dir));
            manager.start_all(&cfg).await?;
            server::run_server(&cfg, manager).await?;
        }
    }

    Ok(())
}
