//! Process supervision: the runtime directory tree, the store child
//! process and the exit/signal discipline that keeps the store consistent
//! across restarts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::context::NodeCtx;
use crate::error::{NodeError, Result};

const KEYS_WARNING: &str = "\
To join the Shoggoth network, you need a pair of cryptographic keys.
This includes a PUBLIC KEY which identifies you on the network, and a
PRIVATE KEY which signs activities by your node.
Your public key is shared on the network but YOUR PRIVATE KEY MUST BE KEPT SECRET.";

/// Attempts to reach the store this many times after launching it.
const STORE_PROBE_ATTEMPTS: u32 = 10;
const STORE_PROBE_DELAY: Duration = Duration::from_millis(500);

/// Bounded wait for a signaled process to disappear.
const PROCESS_EXIT_ATTEMPTS: u32 = 30;

/// Ensures the runtime directory tree exists and the node has a key pair.
pub fn prepare_runtime(runtime_path: &Path) -> Result<()> {
    let node_runtime = runtime_path.join("node");

    for dir in [
        runtime_path.to_path_buf(),
        runtime_path.join("keys"),
        node_runtime.join("pins"),
        node_runtime.join("tmp"),
        node_runtime.join("update"),
    ] {
        std::fs::create_dir_all(dir)?;
    }

    let keys_path = runtime_path.join("keys");
    if !lib_crypto::keys_exist(&keys_path) {
        warn!("{KEYS_WARNING}");
        info!("generating a new key pair ...");

        lib_crypto::generate_key_pair(&keys_path.join("private.txt"), &keys_path.join("public.txt"))
            .map_err(|e| NodeError::Internal(format!("key generation failed: {e}")))?;

        info!("Key pair generated successfully in {}", keys_path.display());
    }

    Ok(())
}

fn db_pid_path(node_runtime: &Path) -> PathBuf {
    node_runtime.join("db_pid.txt")
}

/// True when a process with this PID exists.
fn process_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

/// Signals a process and waits (bounded) for it to exit.
fn signal_and_wait(pid: i32, signal: Signal, what: &str) {
    if kill(Pid::from_raw(pid), signal).is_err() {
        return;
    }

    for _ in 0..PROCESS_EXIT_ATTEMPTS {
        if !process_alive(pid) {
            return;
        }
        info!("Waiting for {what} process to exit ...");
        std::thread::sleep(Duration::from_secs(1));
    }

    warn!("{what} process did not exit after {PROCESS_EXIT_ATTEMPTS}s");
}

/// Stops any store child left over from a previous run.
pub fn kill_stale_store(node_runtime: &Path) -> Result<()> {
    let pid_path = db_pid_path(node_runtime);

    if !pid_path.is_file() {
        return Ok(());
    }

    let pid_text = std::fs::read_to_string(&pid_path)?;
    if let Ok(pid) = pid_text.trim().parse::<i32>() {
        if process_alive(pid) {
            signal_and_wait(pid, Signal::SIGINT, "stale store");
            info!("db process stopped");
        }
    }

    std::fs::remove_file(&pid_path)?;
    Ok(())
}

/// Forks the store child with stdout/stderr redirected to its log file,
/// records its PID and verifies it is alive and reachable.
pub async fn launch_store(ctx: &NodeCtx) -> Result<Child> {
    let node_runtime = ctx.node_runtime_path();

    kill_stale_store(&node_runtime)?;

    let logs_path = node_runtime.join("db_logs.txt");
    let logs = std::fs::File::create(&logs_path)?;
    let logs_err = logs.try_clone()?;

    let store_bin = node_runtime.join("bin").join("shogdb");
    let store_config = node_runtime.join("dbconfig.toml");

    let mut child = Command::new(&store_bin)
        .arg("-c")
        .arg(&store_config)
        .stdin(Stdio::null())
        .stdout(Stdio::from(logs))
        .stderr(Stdio::from(logs_err))
        .spawn()
        .map_err(|e| {
            NodeError::Internal(format!(
                "error occured while launching the store executable `{}`: {e}",
                store_bin.display()
            ))
        })?;

    if let Some(pid) = child.id() {
        std::fs::write(db_pid_path(&node_runtime), pid.to_string())?;
    }

    tokio::time::sleep(Duration::from_secs(1)).await;

    if let Ok(Some(status)) = child.try_wait() {
        let logs = std::fs::read_to_string(&logs_path).unwrap_or_default();
        return Err(NodeError::Internal(format!(
            "store process exited immediately with {status}.\nDB LOGS:\n{logs}"
        )));
    }

    for _ in 0..STORE_PROBE_ATTEMPTS {
        if ctx.store.is_reachable().await {
            return Ok(child);
        }
        tokio::time::sleep(STORE_PROBE_DELAY).await;
    }

    Err(NodeError::StoreUnreachable(format!(
        "store did not become reachable at {}",
        ctx.store.address()
    )))
}

/// SIGTERMs the store child and waits for it before returning, so its
/// snapshot lands on disk.
pub async fn shutdown_store(ctx: &NodeCtx, child: &mut Child) -> Result<()> {
    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("db child process did not exit normally: {status}"),
        Err(e) => warn!("waiting for db child process failed: {e}"),
    }

    let _ = std::fs::remove_file(db_pid_path(&ctx.node_runtime_path()));
    Ok(())
}

/// Installs the SIGINT/SIGTERM handlers that flip the shutdown flag.
pub fn spawn_signal_handler(ctx: Arc<NodeCtx>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        warn!("could not install SIGTERM handler: {e}");
                        let _ = ctrl_c.await;
                        info!("STOPPING NODE ......");
                        ctx.request_shutdown();
                        return;
                    }
                };

            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        info!("STOPPING NODE ......");
        ctx.request_shutdown();
    });
}

/// Service-mode helpers working on the node's own PID file.
pub mod service {
    use super::*;

    pub fn pid_path(node_runtime: &Path) -> PathBuf {
        node_runtime.join("node_service_pid.txt")
    }

    pub fn logs_path(node_runtime: &Path) -> PathBuf {
        node_runtime.join("node_service_logs.txt")
    }

    /// PID of the running node service, if any.
    pub fn running_pid(node_runtime: &Path) -> Option<i32> {
        let text = std::fs::read_to_string(pid_path(node_runtime)).ok()?;
        let pid = text.trim().parse::<i32>().ok()?;

        process_alive(pid).then_some(pid)
    }

    /// SIGINTs the service and waits for it to exit.
    pub fn stop(node_runtime: &Path) -> Result<()> {
        let Some(pid) = running_pid(node_runtime) else {
            return Err(NodeError::Validation("Node service is not running".to_string()));
        };

        signal_and_wait(pid, Signal::SIGINT, "node");
        let _ = std::fs::remove_file(pid_path(node_runtime));

        info!("Node service stopped");
        Ok(())
    }
}
