//! pkgmeta - resolve package metadata from the command line.
//!
//! Prints one JSON document per run: an array with the resolved record or
//! the error for each requested identity, in argument order.

use anyhow::{Context, Result};
use clap::Parser;
use pkgmeta_core::{
    CancellationToken, MetadataRecord, MetadataServiceBuilder, PackageIdentity, ResolverConfig,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "pkgmeta")]
#[command(about = "Resolve package metadata (authors, descriptions, licenses)")]
struct Args {
    /// Packages as NAME@VERSION or NAME/VERSION
    #[arg(required = true)]
    packages: Vec<String>,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Global packages folder (overrides config)
    #[arg(long)]
    packages_root: Option<PathBuf>,

    /// Durable cache directory (overrides config)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Custom metadata API endpoint (overrides config)
    #[arg(long)]
    custom_api: Option<String>,

    /// Concurrent tier chains per package (overrides config)
    #[arg(long)]
    max_parallelism: Option<usize>,

    /// Only print records already in the cache
    #[arg(long)]
    cached_only: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Outcome {
    Record(Box<MetadataRecord>),
    Missing { identity: String, error: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the JSON result
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let identities = args
        .packages
        .iter()
        .map(|raw| PackageIdentity::parse(raw))
        .collect::<pkgmeta_core::Result<Vec<_>>>()
        .context("Invalid package argument")?;

    let config = match args.config {
        Some(ref path) => ResolverConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ResolverConfig::default(),
    };

    let mut builder = MetadataServiceBuilder::from_config(&config);
    if let Some(root) = args.packages_root {
        builder = builder.packages_root(root);
    }
    if let Some(dir) = args.cache_dir {
        builder = builder.cache_dir(dir);
    }
    if let Some(endpoint) = args.custom_api {
        builder = builder.custom_api_endpoint(endpoint);
    }
    if let Some(n) = args.max_parallelism {
        builder = builder.max_parallelism(n);
    }
    let service = builder.build().await?;
    info!("Using cache at {}", service.cache_dir().display());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let outcomes: Vec<Outcome> = if args.cached_only {
        identities
            .iter()
            .map(|identity| match service.cached(identity) {
                Some(record) => Outcome::Record(Box::new(record)),
                None => Outcome::Missing {
                    identity: identity.to_string(),
                    error: "not cached".to_string(),
                },
            })
            .collect()
    } else {
        service
            .resolve_all(&identities, &cancel)
            .await
            .into_iter()
            .zip(&identities)
            .map(|(result, identity)| match result {
                Ok(record) => Outcome::Record(Box::new(record)),
                Err(e) => Outcome::Missing {
                    identity: identity.to_string(),
                    error: e.to_string(),
                },
            })
            .collect()
    };

    let json = if args.pretty {
        serde_json::to_string_pretty(&outcomes)?
    } else {
        serde_json::to_string(&outcomes)?
    };
    println!("{}", json);

    service.shutdown().await;
    Ok(())
}
