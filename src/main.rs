//! SWORD Server Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults (http://localhost:8080/, 10 collections)
//! sword-server
//!
//! # Start with custom config
//! sword-server --config /path/to/config.toml
//!
//! # Serve under a public base URL
//! sword-server --base-url https://repo.example.org/sword/ --http-port 8443
//!
//! # Open deposit, no credentials required
//! sword-server --no-auth
//! ```
//!
//! ## HTTP API
//!
//! - `GET /health` - Health check
//! - `GET /sd-uri` - Service document
//! - `POST /col-uri/{collection}` - Deposit a new container
//! - `GET|PUT|POST|DELETE /edit-uri/{collection}/{id}` - Container
//! - `GET|PUT|POST|DELETE /em-uri/{collection}/{id}` - Media resource
//! - `GET /state-uri/{collection}/{id}.{rdf|atom}` - Statement

use clap::Parser;
use sword_server::{Config, FileStore, HttpServer, SwordServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sword-server")]
#[command(about = "SWORD v2 deposit server")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "SWORD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP port to listen on
    #[arg(long, env = "SWORD_HTTP_PORT")]
    http_port: Option<u16>,

    /// Public base URL all resource URIs are built from
    #[arg(long, env = "SWORD_BASE_URL")]
    base_url: Option<String>,

    /// Number of collections to provision on first start
    #[arg(long)]
    num_collections: Option<usize>,

    /// Disable HTTP Basic authentication
    #[arg(long)]
    no_auth: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sword_server=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(n) = args.num_collections {
        config.num_collections = n;
    }
    if args.no_auth {
        config.authenticate = false;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        base_url = %config.base_url,
        "Starting sword-server"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    // Initialize store and make sure the collections exist
    let store = FileStore::new(config.store_dir()).await?;
    let collections = store.provision_collections(config.num_collections).await?;
    info!(count = collections.len(), "Collections ready");

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let engine = Arc::new(SwordServer::new(Arc::new(config), Arc::new(store)));
    let http_server = Arc::new(HttpServer::new(engine, http_addr));

    info!(url = %http_server.engine().uris().sd_uri(), "Service document");
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    Ok(())
}
