//! s3pit-server - local S3-compatible object storage emulator
//!
//! Serves the S3 API against either a filesystem-backed or in-memory
//! store, multiplexed per tenant by access key.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use s3pit_auth::{SigV4Verifier, TenantRegistry};
use s3pit_server::delay::{DelayConfig, DelayParams};
use s3pit_server::state::AppState;
use s3pit_server::{build_router, config};
use s3pit_storage::{Backend, TenantStoreRouter};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Fs,
    Memory,
}

#[derive(Parser, Debug)]
#[command(name = "s3pit-server")]
#[command(about = "Local S3-compatible object storage emulator")]
#[command(version)]
struct Args {
    /// Tenant configuration document (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address for the S3 API
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    listen: String,

    /// Root directory for tenants without a customDir, and for the
    /// no-config sentinel tenant
    #[arg(long, default_value = "./s3pit-data")]
    global_dir: PathBuf,

    /// AWS region used in SigV4 verification
    #[arg(long, default_value = "us-east-1")]
    region: String,

    /// Create the destination bucket automatically on first write to it
    #[arg(long, default_value_t = false)]
    auto_create_bucket: bool,

    /// Storage backend for newly seen tenants
    #[arg(long, value_enum, default_value_t = BackendArg::Fs)]
    backend: BackendArg,

    /// Fixed artificial delay (ms) applied to GET/HEAD requests
    #[arg(long, default_value_t = 0)]
    delay_read_fixed_ms: u64,
    /// Minimum artificial delay (ms) for GET/HEAD, sampled uniformly with max
    #[arg(long, default_value_t = 0)]
    delay_read_min_ms: u64,
    /// Maximum artificial delay (ms) for GET/HEAD, sampled uniformly with min
    #[arg(long, default_value_t = 0)]
    delay_read_max_ms: u64,

    /// Fixed artificial delay (ms) applied to PUT/POST/DELETE requests
    #[arg(long, default_value_t = 0)]
    delay_write_fixed_ms: u64,
    /// Minimum artificial delay (ms) for writes, sampled uniformly with max
    #[arg(long, default_value_t = 0)]
    delay_write_min_ms: u64,
    /// Maximum artificial delay (ms) for writes, sampled uniformly with min
    #[arg(long, default_value_t = 0)]
    delay_write_max_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting s3pit-server");

    let doc = match &args.config {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            info!("no --config given, running with no tenants configured");
            s3pit_common::config::TenantConfigDocument {
                global_dir: Some(args.global_dir.to_string_lossy().into_owned()),
                tenants: Vec::new(),
            }
        }
    };

    let registry = Arc::new(TenantRegistry::load(&doc)?);
    let backend = match args.backend {
        BackendArg::Fs => Backend::Fs,
        BackendArg::Memory => Backend::Memory,
    };
    let store_router = Arc::new(TenantStoreRouter::new(
        registry.clone(),
        backend,
        args.global_dir.clone(),
    ));
    let verifier = Arc::new(SigV4Verifier::new(args.region.clone()));

    let delay = DelayConfig {
        read: DelayParams {
            fixed_ms: args.delay_read_fixed_ms,
            min_ms: args.delay_read_min_ms,
            max_ms: args.delay_read_max_ms,
        },
        write: DelayParams {
            fixed_ms: args.delay_write_fixed_ms,
            min_ms: args.delay_write_min_ms,
            max_ms: args.delay_write_max_ms,
        },
    };

    let state = Arc::new(AppState {
        registry,
        store_router,
        verifier,
        auto_create_bucket: args.auto_create_bucket,
        delay,
    });

    // Single-part uploads up to 100MB; larger objects should use multipart.
    info!("Max single-part upload size: 100 MB");
    info!(backend = ?args.backend, auto_create_bucket = args.auto_create_bucket, "configuration");

    let app = build_router(state);

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", args.listen))?;

    info!("Listening on {addr}");
    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("s3pit-server shut down gracefully");
    Ok(())
}
