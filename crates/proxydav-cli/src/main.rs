//! ProxyDAV server binary.
//!
//! Wires configuration, the persistent store, the virtual filesystem,
//! the metadata cache, and the WebDAV server together, then runs until
//! SIGINT/SIGTERM.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use proxydav_core::{FileEntry, MetadataCache, PersistentStore, RocksStore, VirtualFs};
use proxydav_webdav::{
    ContentDelivery, DavHandler, DeliveryMode, MetadataResolver, ProxyDavServer, ServerConfig,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Serve remote HTTP(S) resources as a virtual WebDAV filesystem.
#[derive(Parser, Debug)]
#[command(name = "proxydav", version)]
struct Cli {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Directory for the persistent store
    #[arg(long, env = "DATA_DIR", default_value = "./proxydav-data")]
    data_dir: PathBuf,

    /// Metadata cache TTL in seconds
    #[arg(long, env = "CACHE_TTL", default_value_t = 3600)]
    cache_ttl: u64,

    /// Maximum number of cached metadata records
    #[arg(long, env = "MAX_CACHE_SIZE", default_value_t = 1000)]
    max_cache_size: usize,

    /// Answer GET with 302 redirects instead of proxying content
    #[arg(long, env = "USE_REDIRECT")]
    redirect: bool,

    /// JSON file with path/url mappings to import at startup
    #[arg(long, env = "IMPORT_FILE")]
    import: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn validate(&self) -> Result<()> {
        ensure!(self.cache_ttl > 0, "cache TTL must be positive");
        ensure!(self.max_cache_size > 0, "max cache size must be positive");
        Ok(())
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads a JSON array of `{path, url}` mappings.
fn load_import_file(path: &Path) -> Result<Vec<FileEntry>> {
    let data = std::fs::read(path)
        .with_context(|| format!("failed to read import file {}", path.display()))?;
    serde_json::from_slice(&data)
        .with_context(|| format!("failed to parse import file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    cli.validate()?;
    init_tracing(cli.verbose);

    let kv = RocksStore::open(&cli.data_dir)
        .with_context(|| format!("failed to open store in {}", cli.data_dir.display()))?;
    let store = PersistentStore::new(Arc::new(kv));
    info!(data_dir = %cli.data_dir.display(), "Persistent store ready");

    let vfs = Arc::new(VirtualFs::new(store.clone()).context("failed to build virtual filesystem")?);
    info!(
        files = vfs.all_files().len(),
        "Virtual filesystem initialized"
    );

    if let Some(path) = &cli.import {
        let entries = load_import_file(path)?;
        let (added, failed) = vfs.import(&entries);
        info!(added, failed, file = %path.display(), "Import finished");
    }

    let cache = Arc::new(MetadataCache::new(
        Duration::from_secs(cli.cache_ttl),
        cli.max_cache_size,
    ));
    let client = reqwest::Client::builder()
        .build()
        .context("failed to build HTTP client")?;
    let mode = if cli.redirect {
        DeliveryMode::Redirect
    } else {
        DeliveryMode::Proxy
    };

    let resolver = MetadataResolver::new(store.clone(), Arc::clone(&cache), client.clone());
    let delivery = ContentDelivery::new(client, mode);
    let handler = DavHandler::new(Arc::clone(&vfs), resolver, delivery);

    let server = ProxyDavServer::start(
        handler,
        ServerConfig {
            port: cli.port,
            bind_address: cli.bind,
        },
    )
    .await
    .context("failed to start server")?;
    info!(url = %server.url(), redirect = cli.redirect, "ProxyDAV serving");

    shutdown_signal().await;
    info!("Shutdown signal received, stopping");
    server.stop().await;
    cache.close();
    Ok(())
}

/// Completes on SIGINT or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    result = ctrl_c => {
                        if let Err(err) = result {
                            warn!(error = %err, "failed to listen for ctrl-c");
                        }
                    }
                    _ = term.recv() => {}
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                if let Err(err) = ctrl_c.await {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            warn!(error = %err, "failed to listen for ctrl-c");
        }
    }
}
