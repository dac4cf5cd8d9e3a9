//! Pin replication: the downloader and updater loops.
//!
//! The downloader fetches pins that peers advertise and this node lacks;
//! the updater refreshes local pins whose remote fingerprint has advanced.
//! Both loops re-read the store every iteration and idempotent-add, so
//! races on the PinIndex are tolerated.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lib_pins::{
    copy_dir, extract_tarball, validate_authorization, validate_resource_dir, Fingerprint,
    PinStore, ScratchLock,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::context::NodeCtx;
use crate::db;
use crate::error::{NodeError, Result};

const LOCK_POLL: Duration = Duration::from_secs(1);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Downloads a pin from a remote node and installs it at `final_dir`.
///
/// The tarball is streamed to a locked scratch path, checked against both
/// storage caps, validated against the fingerprint and signature carried
/// in the response headers, and swapped into place through a sibling
/// directory so readers never see a half-written pin.
pub async fn download_remote_profile(
    ctx: &NodeCtx,
    remote_host: &str,
    shoggoth_id: &str,
    final_dir: &Path,
) -> Result<()> {
    let tmp_path = ctx.node_tmp_path();
    let tmp_tarball = tmp_path.join(format!("{shoggoth_id}.tar"));
    let tmp_dir = tmp_path.join(shoggoth_id);

    let _lock = ScratchLock::acquire(&tmp_tarball, LOCK_POLL, LOCK_TIMEOUT).await?;

    let result = fetch_and_install(ctx, remote_host, shoggoth_id, final_dir, &tmp_path, &tmp_tarball, &tmp_dir).await;

    remove_scratch(&tmp_tarball, &tmp_dir);

    result
}

async fn fetch_and_install(
    ctx: &NodeCtx,
    remote_host: &str,
    shoggoth_id: &str,
    final_dir: &Path,
    tmp_path: &Path,
    tmp_tarball: &Path,
    tmp_dir: &Path,
) -> Result<()> {
    let mut response = ctx
        .http
        .get(format!("{remote_host}/api/clone/{shoggoth_id}"))
        .send()
        .await
        .map_err(|e| NodeError::Network(format!("downloading remote pin failed: {e}")))?;

    if !response.status().is_success() {
        return Err(NodeError::Network(
            "Could not download profile: status was not OK".to_string(),
        ));
    }

    let fingerprint_text = header_value(&response, "fingerprint")
        .ok_or_else(|| NodeError::Protocol("no fingerprint header was found in remote clone response".to_string()))?;
    let signature = header_value(&response, "signature")
        .ok_or_else(|| NodeError::Protocol("no signature header was found in remote clone response".to_string()))?;

    let mut tarball_file = tokio::fs::File::create(tmp_tarball).await?;
    while let Some(chunk) = response.chunk().await? {
        tarball_file.write_all(&chunk).await?;
    }
    tarball_file.flush().await?;
    drop(tarball_file);

    let profile_size = std::fs::metadata(tmp_tarball)?.len();
    let current_total = ctx.pin_store().total_size()?;
    ctx.caps().check(profile_size, current_total)?;

    extract_tarball(tmp_tarball, tmp_dir)?;
    validate_resource_dir(tmp_dir)?;

    let fingerprint = Fingerprint::from_json(&fingerprint_text)?;
    validate_authorization(tmp_path, tmp_tarball, &fingerprint, &fingerprint_text, &signature)?;

    let mut new_name = final_dir.as_os_str().to_os_string();
    new_name.push(".new");
    let new_dir = PathBuf::from(new_name);

    extract_tarball(tmp_tarball, &new_dir)?;
    PinStore::write_metadata(&new_dir, &fingerprint_text, &signature)?;
    PinStore::swap_in(&new_dir, final_dir)?;

    Ok(())
}

fn header_value(response: &reqwest::Response, name: &str) -> Option<String> {
    response.headers().get(name)?.to_str().ok().map(str::to_string)
}

fn remove_scratch(tmp_tarball: &Path, tmp_dir: &Path) {
    let _ = std::fs::remove_file(tmp_tarball);
    let _ = std::fs::remove_dir_all(tmp_dir);
}

/// One downloader pass: refresh every peer's advertised pins in the store,
/// then fetch whatever this node does not hold yet.
pub async fn downloader_round(ctx: &NodeCtx) -> Result<()> {
    let dht = db::get_dht(ctx).await?;
    let mut local_pins = db::get_pins(ctx).await?;
    let pin_store = ctx.pin_store();

    for peer in &dht.0 {
        let response = match ctx.http.get(format!("{}/api/get_pins", peer.host)).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(_) => {
                warn!(node_id = %peer.node_id, "could not get remote pins: response status was not 200");
                continue;
            }
            Err(e) => {
                warn!(node_id = %peer.node_id, host = %peer.host, "could not get remote pins: {e}");
                continue;
            }
        };

        let remote_pins: Vec<String> = match response.json().await {
            Ok(pins) => pins,
            Err(e) => {
                warn!(node_id = %peer.node_id, "could not parse remote pins: {e}");
                continue;
            }
        };

        if let Err(e) = db::clear_peer_pins(ctx, &peer.node_id).await {
            warn!(node_id = %peer.node_id, "could not clear peer pins: {e}");
            continue;
        }

        for pin in &remote_pins {
            if !lib_crypto::is_valid_shoggoth_id(pin) {
                warn!(node_id = %peer.node_id, pin = %pin, "peer advertised an invalid shoggoth id");
                continue;
            }

            if let Err(e) = db::peer_pins_add(ctx, &peer.node_id, pin).await {
                warn!(node_id = %peer.node_id, "could not record peer pin: {e}");
            }

            if local_pins.iter().any(|local| local == pin) {
                continue;
            }

            let final_dir = pin_store.pin_dir(pin);

            match download_remote_profile(ctx, &peer.host, pin, &final_dir).await {
                Ok(()) => {
                    if let Err(e) = db::pins_add(ctx, pin).await {
                        warn!(pin = %pin, "could not add pin to the store: {e}");
                    }
                    local_pins.push(pin.clone());
                    info!(pin = %pin, "PIN DOWNLOADED");

                    maybe_stage_update(ctx, pin, &final_dir);
                }
                Err(e) => {
                    error!(pin = %pin, "download remote profile failed: {e}");
                }
            }
        }
    }

    Ok(())
}

/// One updater pass: refresh local pins whose remote fingerprint carries a
/// different hash and a strictly newer timestamp.
pub async fn updater_round(ctx: &NodeCtx) -> Result<()> {
    let local_pins = db::get_pins(ctx).await?;
    let pin_store = ctx.pin_store();

    for pin in &local_pins {
        let peers = match db::get_peers_with_pin(ctx, pin).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(pin = %pin, "could not find peers with pin: {e}");
                continue;
            }
        };

        for peer in &peers {
            let response = match ctx
                .http
                .get(format!("{}/api/get_fingerprint/{pin}", peer.host))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => response,
                Ok(_) => {
                    warn!(pin = %pin, "could not get fingerprint for pin: response status was not 200");
                    continue;
                }
                Err(e) => {
                    warn!(pin = %pin, "could not get fingerprint for pin: {e}");
                    continue;
                }
            };

            let remote_text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(pin = %pin, "could not read remote fingerprint: {e}");
                    continue;
                }
            };

            let remote = match Fingerprint::from_json(&remote_text) {
                Ok(remote) => remote,
                Err(e) => {
                    warn!(pin = %pin, "could not parse remote fingerprint: {e}");
                    continue;
                }
            };

            let local = match pin_store.read_fingerprint(pin) {
                Ok(local) => local,
                Err(e) => {
                    warn!(pin = %pin, "could not read local fingerprint: {e}");
                    continue;
                }
            };

            let newer = match (remote.timestamp_ms(), local.timestamp_ms()) {
                (Ok(remote_ts), Ok(local_ts)) => remote_ts > local_ts,
                _ => false,
            };

            if remote.hash != local.hash && newer {
                info!(pin = %pin, "REMOTE PIN WAS UPDATED");

                let final_dir = pin_store.pin_dir(pin);
                match download_remote_profile(ctx, &peer.host, pin, &final_dir).await {
                    Ok(()) => {
                        info!(pin = %pin, "PIN UPDATED");
                        maybe_stage_update(ctx, pin, &final_dir);
                    }
                    Err(e) => {
                        warn!(pin = %pin, "could not download remote profile: {e}");
                    }
                }
            }
        }
    }

    Ok(())
}

/// When the configured update resource lands, stage it under
/// `node/update/` and request shutdown so the service wrapper restarts
/// onto the staged build.
fn maybe_stage_update(ctx: &NodeCtx, pin: &str, final_dir: &Path) {
    if !ctx.config.update.enable || ctx.config.update.id != pin {
        return;
    }

    warn!(pin = %pin, "STAGING NODE UPDATE ...");

    let update_path = ctx.node_update_path();
    let _ = std::fs::remove_dir_all(&update_path);

    if let Err(e) = copy_dir(final_dir, &update_path) {
        error!("could not stage node update: {e}");
        return;
    }

    warn!("UPDATE STAGED - RESTARTING NODE SERVICE ...");
    ctx.request_shutdown();
}

/// The downloader task.
pub async fn downloader_loop(ctx: Arc<NodeCtx>) {
    if !ctx.config.pins.enable_downloader {
        warn!("Pin downloader disabled");
        return;
    }

    run_loop(ctx.clone(), ctx.config.pins.downloader_frequency, |ctx| async move {
        if let Err(e) = downloader_round(&ctx).await {
            warn!("downloader round failed: {e}");
        }
    })
    .await;
}

/// The updater task.
pub async fn updater_loop(ctx: Arc<NodeCtx>) {
    if !ctx.config.pins.enable_updater {
        warn!("Pin updater disabled");
        return;
    }

    if !ctx.config.update.enable {
        warn!("auto-update disabled");
    }

    run_loop(ctx.clone(), ctx.config.pins.updater_frequency, |ctx| async move {
        if let Err(e) = updater_round(&ctx).await {
            warn!("updater round failed: {e}");
        }
    })
    .await;
}

async fn run_loop<F, Fut>(ctx: Arc<NodeCtx>, frequency_secs: u64, round: F)
where
    F: Fn(Arc<NodeCtx>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let frequency = Duration::from_secs(frequency_secs);
    let mut shutdown = ctx.subscribe_shutdown();

    loop {
        if ctx.should_exit() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(frequency) => {}
            _ = shutdown.changed() => return,
        }

        if ctx.should_exit() {
            return;
        }

        round(ctx.clone()).await;
    }
}
