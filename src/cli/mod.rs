//! Command-line interface for bucket-invert.
//!
//! Provides commands for listening to a bucket, processing a single object,
//! and inspecting the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{MinioClient, ObjectStore};
use crate::config::{self, ResolvedConfig};
use crate::core::{Invert, ProcessOutcome, TransformPipeline};
use crate::domain::ObjectRecord;
use crate::ingest::NotificationConsumer;

/// bucket-invert - invert images dropped into a MinIO bucket
#[derive(Parser, Debug)]
#[command(name = "bucket-invert")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to a discovered .bucket-invert/config.yaml)
    #[arg(long, global = true, env = "BUCKET_INVERT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Listen for new objects and invert them until Ctrl-C
    Listen,

    /// Run the pipeline once for an object already in the source bucket
    Process {
        /// Object key
        key: String,

        /// Content type of the object (e.g. image/png)
        #[arg(short = 't', long)]
        content_type: String,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = config::load(self.config.as_deref())?;

        match self.command {
            Commands::Listen => listen(&config).await,
            Commands::Process { key, content_type } => {
                process_one(&config, key, content_type).await
            }
            Commands::Config => {
                show_config(&config);
                Ok(())
            }
        }
    }
}

async fn connect(config: &ResolvedConfig) -> Result<Arc<dyn ObjectStore>> {
    let client = MinioClient::connect(&config.endpoint, config.credentials.clone(), &config.region)
        .await
        .with_context(|| format!("Cannot create MinIO client for {}", config.endpoint))?;
    Ok(Arc::new(client))
}

fn build_pipeline(config: &ResolvedConfig, store: Arc<dyn ObjectStore>) -> TransformPipeline {
    TransformPipeline::new(
        store,
        config.staging_area(),
        Arc::new(Invert),
        config.buckets.clone(),
        config.limits.clone(),
    )
}

async fn listen(config: &ResolvedConfig) -> Result<()> {
    let store = connect(config).await?;
    let pipeline = Arc::new(build_pipeline(config, Arc::clone(&store)));
    let ledger = pipeline.staging().ledger();

    let handle = NotificationConsumer::new(store, pipeline, config.reconnect.clone()).spawn();

    let report = handle
        .stop_on(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    tracing::info!(
        events = report.events,
        records = report.records,
        uploaded = report.uploaded,
        skipped = report.skipped,
        failed = report.failed,
        stream_errors = report.stream_errors,
        resubscriptions = report.resubscriptions,
        live_staged = ledger.live(),
        "Listener report"
    );

    Ok(())
}

async fn process_one(config: &ResolvedConfig, key: String, content_type: String) -> Result<()> {
    let store = connect(config).await?;
    let pipeline = build_pipeline(config, store);

    match pipeline.process(&ObjectRecord::new(key, content_type)).await {
        ProcessOutcome::Uploaded(info) => {
            println!(
                "{}/{} ({} bytes)",
                config.buckets.destination, info.key, info.size
            );
            Ok(())
        }
        ProcessOutcome::Skipped { content_type } => {
            bail!("Skipped: unsupported content type {}", content_type)
        }
        ProcessOutcome::Failed(e) => bail!("{}: {}", e, e.detail()),
    }
}

fn show_config(config: &ResolvedConfig) {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Object store:");
    println!("  Endpoint:    {}", config.endpoint);
    println!("  Region:      {}", config.region);
    println!("  Access key:  {}", config.credentials.access_key);
    println!("  Secret key:  ********");
    println!();
    println!("Buckets:");
    println!("  Source:      {}", config.buckets.source);
    println!("  Destination: {}", config.buckets.destination);
    println!();
    println!("Staging:");
    println!("  Directory:   {}", config.staging_dir.display());
    println!("  Prefix:      {}", config.staging_prefix);
    println!();
    println!("Limits:");
    println!("  Download timeout: {}s", config.limits.download_timeout_seconds);
    println!("  Upload timeout:   {}s", config.limits.upload_timeout_seconds);
    println!("  Max object size:  {} bytes", config.limits.max_object_bytes);
    println!();
    println!("Reconnect:");
    println!("  Startup attempts: {}", config.reconnect.startup_attempts);
    println!("  Initial delay:    {}ms", config.reconnect.initial_delay_ms);
    println!("  Max delay:        {}ms", config.reconnect.max_delay_ms);
    println!("  Multiplier:       {}", config.reconnect.multiplier);
}
