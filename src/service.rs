use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::BlobStorage;
use state_store::MetadataStore;
use tokio::signal;
use tracing::info;

use crate::{
    assets::AssetManager,
    config::ServerConfig,
    routes::{create_routes, RouteState},
};

/// Wires the metadata store, the blob store, and the asset manager
/// together and runs the HTTP API against them.
#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub state: Arc<MetadataStore>,
    pub blob_storage: Arc<BlobStorage>,
    pub asset_manager: Arc<AssetManager>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );
        let state = MetadataStore::open(config.state_store_path.parse()?)
            .context("error initializing metadata store")?;
        let asset_manager = Arc::new(AssetManager::new(
            state.clone(),
            blob_storage.clone(),
            config.encryption_secret.clone(),
        ));
        Ok(Self {
            config,
            state,
            blob_storage,
            asset_manager,
        })
    }

    pub async fn start(&self) -> Result<()> {
        let route_state = RouteState {
            state: self.state.clone(),
            asset_manager: self.asset_manager.clone(),
            api_tokens: Arc::new(self.config.api_tokens.clone()),
        };

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(create_routes(route_state).into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
