use chainge::api::{self, AppState};
use chainge::config::load_config;
use chainge::persistence::{Database, InMemoryStore, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let config = load_config(&config_path)?;
    info!(api_port = config.network.api_port, "starting Chainge node");

    // Ensure the data directory exists before opening the database.
    let db_path = std::path::Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let store: Arc<dyn Store> = match Database::open(&config.database.path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            warn!(
                path = %config.database.path,
                error = %e,
                "failed to open database; falling back to in-memory store"
            );
            Arc::new(InMemoryStore::new())
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.network.api_port));
    api::serve(AppState::new(store), addr).await?;
    Ok(())
}
