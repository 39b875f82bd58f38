//! CLI commands implementation.
//!
//! The engine is a library; this binary is a diagnostic surface for it:
//! probe a URL through the polite fetch path and report how the detector
//! classifies the response, validate a configuration file, or list the
//! identity rotation pool.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::config::EngineConfig;
use crate::engine::detector::{classify, StatusClass};
use crate::engine::scheduler::{Scheduler, IDENTITY_POOL};
use crate::engine::session::{Method, SessionState};
use crate::http::{Fetcher, HttpFetcher};

#[derive(Parser)]
#[command(name = "regcrawl")]
#[command(about = "Resilient scraping protocol engine for public record directories")]
#[command(version)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL once through the polite request path and report how the
    /// response classifies
    Probe {
        /// URL to probe
        url: String,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to the TOML configuration file
        path: PathBuf,
    },

    /// List the browser identity rotation pool
    Identities,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Probe { url } => probe(&config, &url).await,
        Commands::CheckConfig { path } => check_config(&path),
        Commands::Identities => {
            for identity in IDENTITY_POOL {
                println!("{}", identity);
            }
            Ok(())
        }
    }
}

async fn probe(config: &EngineConfig, url: &str) -> anyhow::Result<()> {
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(config)?);
    let mut scheduler = Scheduler::new(config);
    let session = SessionState::new();

    println!("Waiting out the politeness delay...");
    scheduler.wait().await;

    let spec = session.build_request(Method::Get, url, &[]);
    let response = fetcher.fetch(&spec, scheduler.next_identity()).await;
    let class = classify(response.status, &response.body);

    println!("Status:         {}", response.status);
    println!("Body bytes:     {}", response.body.len());
    println!("New cookies:    {}", response.cookies.len());
    println!("Classification: {:?}", class);

    match class {
        StatusClass::Ok => {}
        StatusClass::RateLimited => {
            println!("This target is rate limiting; the engine would back off and retry.");
        }
        StatusClass::ChallengeDetected => {
            println!("This target sits behind a verification challenge; the engine would abandon it.");
        }
        StatusClass::ServerError | StatusClass::NetworkError => {
            println!("Transient failure; the engine would retry locally before backing off.");
        }
    }
    Ok(())
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    let config = EngineConfig::from_file(path)?;
    println!("Configuration is valid:");
    println!(
        "  politeness window: {}..{} ms",
        config.min_delay_ms, config.max_delay_ms
    );
    println!(
        "  empty-page streak: {}",
        config.max_consecutive_empty_pages
    );
    match config.max_pages {
        Some(pages) => println!("  page ceiling:      {}", pages),
        None => println!("  page ceiling:      unlimited"),
    }
    println!("  cache capacity:    {}", config.cache_capacity);
    Ok(())
}
