//! Node session commands: the long-running `run` mode plus the service
//! management and local resource operations the CLI exposes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lib_pins::{copy_dir, create_tarball, extract_tarball, hash_tarball, Fingerprint, PinStore};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::context::{default_runtime_path, NodeCtx};
use crate::db;
use crate::dht;
use crate::error::{NodeError, Result};
use crate::replication;
use crate::server;
use crate::supervisor;

/// How long shutdown waits for the background loops to notice the flag.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Resolved paths and parsed config shared by every command.
pub struct Session {
    pub runtime_path: PathBuf,
    pub config: NodeConfig,
}

impl Session {
    /// Mirrors node startup: resolve the runtime directory, ensure the
    /// tree and keys exist, parse the config.
    pub fn init(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<Self> {
        let runtime_path = match runtime_path {
            Some(path) => {
                if !path.is_dir() {
                    return Err(NodeError::Config("custom runtime path does not exist".to_string()));
                }
                info!("Using custom runtime path: {}", path.display());
                path
            }
            None => {
                let path = default_runtime_path()?;
                info!("Using default runtime path: {}", path.display());
                path
            }
        };

        supervisor::prepare_runtime(&runtime_path)?;

        let config_path = config_path.unwrap_or_else(|| runtime_path.join("config.toml"));
        let config = NodeConfig::load(&config_path)?;

        Ok(Self { runtime_path, config })
    }

    pub fn ctx(self) -> Result<Arc<NodeCtx>> {
        NodeCtx::init(self.config, self.runtime_path)
    }
}

/// `shog run`: the node process itself.
pub async fn run_node(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let ctx = session.ctx()?;

    info!("NODE VERSION: {}", ctx.manifest.version);
    info!("NODE ID: {}", ctx.manifest.node_id);
    info!("NODE HOST: {}", ctx.config.network.host);
    info!("NODE PORT: {}", ctx.config.network.port);
    info!("NODE PUBLIC HOST: {}", ctx.config.network.public_host);
    info!("DB HOST: {}", ctx.config.db.host);
    info!("DB PORT: {}", ctx.config.db.port);

    let mut store_child = supervisor::launch_store(&ctx).await?;

    let dht_initialized = db::verify_data(&ctx).await?;
    if dht_initialized {
        dht::bootstrap(&ctx).await;
    }

    supervisor::spawn_signal_handler(ctx.clone());

    let gossip = tokio::spawn(dht::updater_loop(ctx.clone()));
    let downloader = tokio::spawn(replication::downloader_loop(ctx.clone()));
    let updater = tokio::spawn(replication::updater_loop(ctx.clone()));

    let served = server::serve(ctx.clone()).await;

    // The server only returns once shutdown is requested (or on a bind
    // failure); give the loops a moment to notice the flag.
    ctx.request_shutdown();

    for task in [gossip, downloader, updater] {
        if tokio::time::timeout(SHUTDOWN_DRAIN, task).await.is_err() {
            warn!("a background loop did not exit in time");
        }
    }

    supervisor::shutdown_store(&ctx, &mut store_child).await?;

    served
}

/// `shog start`: fork the node as a background service.
pub fn start_service(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path.clone(), runtime_path)?;
    let node_runtime = session.runtime_path.join("node");

    info!("Starting node as a service");

    let exe = std::env::current_exe()?;
    let logs = std::fs::File::create(supervisor::service::logs_path(&node_runtime))?;
    let logs_err = logs.try_clone()?;

    let mut command = std::process::Command::new(exe);
    command.arg("run").arg("-r").arg(&session.runtime_path);
    if let Some(config_path) = config_path {
        command.arg("-c").arg(config_path);
    }

    let child = command
        .stdin(std::process::Stdio::null())
        .stdout(logs)
        .stderr(logs_err)
        .spawn()?;

    std::fs::write(supervisor::service::pid_path(&node_runtime), child.id().to_string())?;

    info!("Node service started with pid {}", child.id());
    Ok(())
}

pub fn stop_service(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    supervisor::service::stop(&session.runtime_path.join("node"))
}

pub fn restart_service(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    info!("Restarting node service");

    let session = Session::init(config_path.clone(), runtime_path.clone())?;
    let node_runtime = session.runtime_path.join("node");

    if supervisor::service::running_pid(&node_runtime).is_some() {
        supervisor::service::stop(&node_runtime)?;
    } else {
        println!("Node is not running");
    }

    start_service(config_path, runtime_path)
}

pub fn service_status(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let node_runtime = session.runtime_path.join("node");

    if supervisor::service::running_pid(&node_runtime).is_some() {
        println!("Node is running");
    } else {
        println!("Node is not running");
    }

    Ok(())
}

pub fn print_service_logs(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let logs_path = supervisor::service::logs_path(&session.runtime_path.join("node"));

    let logs = std::fs::read_to_string(logs_path)
        .map_err(|_| NodeError::Validation("Node service is not running".to_string()))?;

    println!("{logs}");
    Ok(())
}

pub fn print_node_id(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let ctx = session.ctx()?;

    println!("Your Node ID is: {}", ctx.manifest.node_id);
    Ok(())
}

/// `shog pin <path> <label>`: stage a local file or directory as a pin,
/// fingerprint it with this node's key and register it.
pub async fn pin_resource(
    config_path: Option<PathBuf>,
    runtime_path: Option<PathBuf>,
    path: PathBuf,
    label: String,
) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let ctx = session.ctx()?;

    info!("pinning `{}` with label `{}`", path.display(), label);

    let staging = ctx.node_tmp_path().join(format!("pin-{}", uuid::Uuid::new_v4()));
    let result = pin_staged_resource(&ctx, &path, &label, &staging).await;
    let _ = std::fs::remove_dir_all(&staging);

    let shoggoth_id = result?;

    info!("resource pinned successfully");
    println!("Shoggoth ID: {shoggoth_id}");
    Ok(())
}

async fn pin_staged_resource(
    ctx: &NodeCtx,
    path: &Path,
    label: &str,
    staging: &Path,
) -> Result<String> {
    if path.is_dir() {
        copy_dir(path, staging)?;
    } else if path.is_file() {
        std::fs::create_dir_all(staging)?;
        let name = path
            .file_name()
            .ok_or_else(|| NodeError::Validation("invalid file name".to_string()))?;
        std::fs::copy(path, staging.join(name))?;
    } else {
        return Err(NodeError::Validation(format!("`{}` does not exist", path.display())));
    }

    let metadata_dir = staging.join(lib_pins::METADATA_DIR);
    std::fs::create_dir_all(&metadata_dir)?;
    std::fs::write(
        metadata_dir.join("manifest.json"),
        serde_json::to_string(&serde_json::json!({ "label": label }))?,
    )?;

    install_local_resource(ctx, staging).await
}

/// Fingerprints a staged directory with this node's key and installs it
/// into the pin tree.
async fn install_local_resource(ctx: &NodeCtx, staging: &Path) -> Result<String> {
    let tmp_path = ctx.node_tmp_path();
    let tarball = tmp_path.join(format!("pin-{}.tar", uuid::Uuid::new_v4()));

    let result = async {
        create_tarball(staging, &tarball)?;
        let hash = hash_tarball(&tmp_path, &tarball)?;
        let shoggoth_id = lib_crypto::shoggoth_id_from_hash(&hash);

        let fingerprint = Fingerprint {
            hash,
            public_key: ctx.manifest.public_key.clone(),
            shoggoth_id: shoggoth_id.clone(),
            timestamp: chrono::Utc::now().timestamp_millis().to_string(),
        };
        let fingerprint_text = fingerprint.to_canonical_json()?;

        let private_key = std::fs::read_to_string(ctx.private_key_path())?;
        let signature = lib_crypto::sign_data(&private_key, &fingerprint_text)
            .map_err(|e| NodeError::Internal(e.to_string()))?;

        let pin_store = ctx.pin_store();
        let final_dir = pin_store.pin_dir(&shoggoth_id);

        let new_dir = tmp_path.join(format!("{shoggoth_id}.new"));
        extract_tarball(&tarball, &new_dir)?;
        PinStore::write_metadata(&new_dir, &fingerprint_text, &signature)?;
        PinStore::swap_in(&new_dir, &final_dir)?;

        // The store is only up while the node runs; startup reconciles
        // the PinIndex from disk either way.
        if let Err(e) = db::pins_add(ctx, &shoggoth_id).await {
            debug!("could not register pin in the store: {e}");
        }

        Ok(shoggoth_id)
    }
    .await;

    let _ = std::fs::remove_file(&tarball);
    result
}

pub async fn unpin_resource(
    config_path: Option<PathBuf>,
    runtime_path: Option<PathBuf>,
    shoggoth_id: String,
) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let ctx = session.ctx()?;

    info!("unpinning resource `{shoggoth_id}`");

    let pin_store = ctx.pin_store();
    if !pin_store.has_pin(&shoggoth_id) {
        return Err(NodeError::Validation("resource not found".to_string()));
    }

    std::fs::remove_dir_all(pin_store.pin_dir(&shoggoth_id))?;

    if let Err(e) = db::pins_remove(&ctx, &shoggoth_id).await {
        debug!("could not remove pin from the store: {e}");
    }

    info!("resource unpinned successfully");
    Ok(())
}

/// `shog clone <url> <label>`: fetch a resource tarball from a node and
/// pin it locally.
pub async fn clone_resource(
    config_path: Option<PathBuf>,
    runtime_path: Option<PathBuf>,
    url: String,
    label: String,
) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let ctx = session.ctx()?;

    info!("cloning resource `{url}`");

    let response = ctx
        .http
        .get(&url)
        .send()
        .await
        .map_err(|e| NodeError::Network(format!("CLONE FAILED: {e}")))?;

    if !response.status().is_success() {
        return Err(NodeError::Network("CLONE FAILED: status was not OK".to_string()));
    }

    let bytes = response.bytes().await?;

    let tmp_path = ctx.node_tmp_path();
    let tmp_tarball = tmp_path.join("clone.tmp");
    std::fs::write(&tmp_tarball, &bytes)?;

    let staging = tmp_path.join(format!("clone-{}", uuid::Uuid::new_v4()));
    let result = async {
        extract_tarball(&tmp_tarball, &staging)?;

        let metadata_dir = staging.join(lib_pins::METADATA_DIR);
        if !metadata_dir.is_dir() {
            std::fs::create_dir_all(&metadata_dir)?;
            std::fs::write(
                metadata_dir.join("manifest.json"),
                serde_json::to_string(&serde_json::json!({ "label": label }))?,
            )?;
        }

        install_local_resource(&ctx, &staging).await
    }
    .await;

    let _ = std::fs::remove_file(&tmp_tarball);
    let _ = std::fs::remove_dir_all(&staging);

    let shoggoth_id = result?;

    info!("resource cloned successfully");
    println!("Shoggoth ID: {shoggoth_id}");
    Ok(())
}

/// `shog backup`: pack config, store snapshot and pins into
/// `node/backup.tar`.
pub fn backup(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let node_runtime = session.runtime_path.join("node");
    let backup_dir = node_runtime.join("tmp/backup");

    info!("Starting node backup ...");

    std::fs::create_dir_all(&backup_dir)?;

    for file in ["dbconfig.toml", "save.sdb"] {
        let source = node_runtime.join(file);
        if source.is_file() {
            std::fs::copy(&source, backup_dir.join(file))?;
        }
    }

    let config_file = session.runtime_path.join("config.toml");
    if config_file.is_file() {
        std::fs::copy(&config_file, backup_dir.join("config.toml"))?;
    }

    let pins_dir = node_runtime.join("pins");
    if pins_dir.is_dir() {
        copy_dir(&pins_dir, &backup_dir.join("pins"))?;
    }

    create_tarball(&backup_dir, &node_runtime.join("backup.tar"))?;
    std::fs::remove_dir_all(&backup_dir)?;

    info!("Node backup finished");
    Ok(())
}

/// `shog restore`: unpack `node/backup.tar` over the runtime.
pub fn restore(config_path: Option<PathBuf>, runtime_path: Option<PathBuf>) -> Result<()> {
    let session = Session::init(config_path, runtime_path)?;
    let node_runtime = session.runtime_path.join("node");
    let backup_dir = node_runtime.join("tmp/backup");

    info!("Starting node restore ...");

    extract_tarball(&node_runtime.join("backup.tar"), &backup_dir)?;

    for file in ["dbconfig.toml", "save.sdb"] {
        let source = backup_dir.join(file);
        if source.is_file() {
            std::fs::copy(&source, node_runtime.join(file))?;
        }
    }

    let config_file = backup_dir.join("config.toml");
    if config_file.is_file() {
        std::fs::copy(&config_file, session.runtime_path.join("config.toml"))?;
    }

    let pins_backup = backup_dir.join("pins");
    if pins_backup.is_dir() {
        copy_dir(&pins_backup, &node_runtime.join("pins"))?;
    }

    std::fs::remove_dir_all(&backup_dir)?;

    info!("Node restore finished");
    Ok(())
}
