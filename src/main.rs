//! Session Mesh node
//!
//! One node of a horizontally scaled fleet serving long-lived client sessions:
//! - Session records and replayable event streams in a shared store
//! - Streamable (`/mcp`) and event-stream (`/sse`, `/messages`) transports
//! - Forwarding to the owner node, or restoring event streams locally
//! - Background cleanup, retention and store health probing

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};

use api::{serve_with_shutdown, AppState, EchoHandler};
use session::{NodeIdentity, SessionConfig, SessionRegistry, StaticOwnerResolver};
use shared_store::{health::check_connection, SharedStore, StoreConfig};
use telemetry::{health, init_tracing_from_env};
use worker::{WorkerConfig, WorkerScheduler};

/// Application configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct Config {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,

    /// Node label; random per process when unset
    #[serde(default)]
    node_id: Option<String>,

    /// Address other nodes reach this one on (diagnostic only)
    #[serde(default)]
    public_url: Option<String>,

    /// Record owners and forward to them; off runs the fleet stateless
    #[serde(default = "default_track_ownership")]
    track_ownership: bool,

    /// Node id -> base URL, for forwarding
    #[serde(default)]
    nodes: HashMap<String, String>,

    #[serde(default)]
    store: StoreConfig,

    #[serde(default)]
    session: SessionConfig,

    #[serde(default)]
    forward: ForwardConfig,
}

/// Forwarding configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ForwardConfig {
    #[serde(default = "default_forward_timeout_secs")]
    timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_track_ownership() -> bool {
    true
}

fn default_forward_timeout_secs() -> u64 {
    30
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_forward_timeout_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            node_id: None,
            public_url: None,
            track_ownership: default_track_ownership(),
            nodes: HashMap::new(),
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            forward: ForwardConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing_from_env();

    info!("Starting Session Mesh v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;

    let node = match &config.node_id {
        Some(id) => NodeIdentity::new(id.clone(), config.track_ownership),
        None => NodeIdentity::generate(config.track_ownership),
    };
    let public_url = config
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://127.0.0.1:{}", config.port));
    info!(
        node = %node.id,
        public_url = %public_url,
        track_ownership = node.track_ownership,
        known_nodes = config.nodes.len(),
        "Node identity"
    );

    let store = shared_store::connect(&config.store)
        .await
        .context("Failed to connect to shared store")?;

    check_health(store.as_ref()).await;

    let registry = SessionRegistry::new(store.clone(), node, &config.session);
    let resolver = Arc::new(StaticOwnerResolver::new(config.nodes.clone()));

    let worker_scheduler = Arc::new(WorkerScheduler::new(
        WorkerConfig::from_session_config(&config.session),
        registry.clone(),
        store.clone(),
    ));
    let worker_handles = worker_scheduler.start();

    let state = AppState::new(
        registry,
        resolver,
        Arc::new(EchoHandler),
        Duration::from_secs(config.forward.timeout_secs),
    )
    .context("Failed to create application state")?;

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("Invalid server address")?;

    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    serve_with_shutdown(listener, state, shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down...");

    for handle in worker_handles {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Load configuration from files and environment.
fn load_config() -> Result<Config> {
    let config = config::Config::builder()
        // Start with defaults
        .add_source(config::Config::try_from(&Config::default())?)
        // Load from config file if exists
        .add_source(
            config::File::with_name("config/default")
                .required(false)
                .format(config::FileFormat::Toml),
        )
        // Override with environment variables
        .add_source(
            config::Environment::default()
                .separator("__")
                .prefix("SESSION_MESH")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    let mut config: Config = config
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    // Flat overrides for the keys deployments set most
    if let Ok(node_id) = std::env::var("SESSION_MESH_NODE_ID") {
        config.node_id = Some(node_id);
    }
    if let Ok(url) = std::env::var("SESSION_MESH_STORE_URL") {
        config.store.url = url;
    }
    if let Ok(url) = std::env::var("SESSION_MESH_PUBLIC_URL") {
        config.public_url = Some(url);
    }
    // "node-a=http://10.0.0.1:8080,node-b=http://10.0.0.2:8080"
    if let Ok(nodes) = std::env::var("SESSION_MESH_NODES") {
        config.nodes = parse_node_table(&nodes);
    }

    Ok(config)
}

fn parse_node_table(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|entry| {
            let (id, addr) = entry.split_once('=')?;
            let (id, addr) = (id.trim(), addr.trim());
            (!id.is_empty() && !addr.is_empty()).then(|| (id.to_string(), addr.to_string()))
        })
        .collect()
}

/// Check store health on startup.
async fn check_health(store: &dyn SharedStore) {
    if check_connection(store).await {
        health().store.set_healthy();
        info!("Shared store connection: healthy");
    } else {
        health().store.set_unhealthy("Connection failed");
        error!("Shared store connection: unhealthy");
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
