use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lib_dht::NodeManifest;
use lib_pins::{PinStore, StorageCaps};
use lib_store::StoreClient;
use tokio::sync::watch;

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};

/// Deadline for requests to other nodes so a slow peer cannot stall a
/// gossip or replication round.
const PEER_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Redirect hop limit of the outbound HTTP client.
const REDIRECT_HOP_LIMIT: usize = 10;

/// Everything a handler or background loop needs: the config, the store
/// client, this node's manifest and the shutdown flag. Constructed once at
/// startup and threaded through every entry point.
#[derive(Debug)]
pub struct NodeCtx {
    pub runtime_path: PathBuf,
    pub config: NodeConfig,
    pub manifest: NodeManifest,
    pub store: StoreClient,
    pub http: reqwest::Client,
    shutdown: watch::Sender<bool>,
}

impl NodeCtx {
    /// Builds the node context. The runtime directory tree and key pair
    /// must already exist.
    pub fn init(config: NodeConfig, runtime_path: PathBuf) -> Result<Arc<Self>> {
        let public_key_pem = std::fs::read_to_string(runtime_path.join("keys/public.txt"))?;
        let stripped = lib_crypto::strip_public_key(&public_key_pem);

        let manifest = NodeManifest::new(
            stripped,
            config.network.public_host.clone(),
            config.explorer.enable,
            env!("CARGO_PKG_VERSION").to_string(),
        );

        let store = StoreClient::new(&config.db.host, config.db.port)
            .map_err(|e| NodeError::StoreUnreachable(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(PEER_REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(REDIRECT_HOP_LIMIT))
            .build()
            .map_err(|e| NodeError::Internal(format!("could not build http client: {e}")))?;

        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self { runtime_path, config, manifest, store, http, shutdown }))
    }

    pub fn keys_path(&self) -> PathBuf {
        self.runtime_path.join("keys")
    }

    pub fn private_key_path(&self) -> PathBuf {
        self.keys_path().join("private.txt")
    }

    pub fn node_runtime_path(&self) -> PathBuf {
        self.runtime_path.join("node")
    }

    pub fn node_pins_path(&self) -> PathBuf {
        self.node_runtime_path().join("pins")
    }

    pub fn node_tmp_path(&self) -> PathBuf {
        self.node_runtime_path().join("tmp")
    }

    pub fn node_update_path(&self) -> PathBuf {
        self.node_runtime_path().join("update")
    }

    pub fn pin_store(&self) -> PinStore {
        PinStore::new(self.node_pins_path(), self.node_tmp_path())
    }

    pub fn caps(&self) -> StorageCaps {
        StorageCaps::from_config(self.config.storage.max_profile_size, self.config.storage.limit)
    }

    /// True once shutdown has been requested. Loops check this before and
    /// after every sleep.
    pub fn should_exit(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// The default runtime path is `$HOME/shoggoth`.
pub fn default_runtime_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| NodeError::Config("could not determine the home directory".to_string()))?;

    Ok(Path::new(&home).join("shoggoth"))
}
