//! DHT membership and the gossip loop.
//!
//! Liveness is measured in gossip rounds, not wall clock: every failed
//! round increments a peer's unreachable counter and the peer is evicted
//! when it reaches [`lib_dht::UNREACHABLE_LIMIT`]. One successful round
//! resets the counter.

use std::sync::Arc;
use std::time::Duration;

use lib_dht::{valid_peer_host, NodeManifest, Peer, UNREACHABLE_LIMIT};
use tracing::{error, info, warn};

use crate::context::NodeCtx;
use crate::db;
use crate::error::{NodeError, Result};

/// Learns a peer from its host URL: fetches its manifest, validates the
/// claimed public host, re-derives the NodeID from the claimed public key
/// and inserts the peer if it is not already known. Insertion is
/// idempotent on node_id.
pub async fn add_new_peer(ctx: &NodeCtx, peer_host: &str) -> Result<()> {
    let allow_private = ctx.config.network.allow_private_network;

    if !valid_peer_host(peer_host, allow_private) {
        return Err(NodeError::Validation("peer host not valid".to_string()));
    }

    let response = ctx
        .http
        .get(format!("{peer_host}/api/get_manifest"))
        .send()
        .await
        .map_err(|e| NodeError::Network(format!("could not get manifest when adding peer: {e}")))?;

    let body = response.text().await?;
    if body.is_empty() {
        return Err(NodeError::Protocol("no response in get manifest request".to_string()));
    }

    let manifest: NodeManifest = serde_json::from_str(&body)
        .map_err(|e| NodeError::Protocol(format!("could not parse peer manifest: {e}")))?;

    if !valid_peer_host(&manifest.public_host, allow_private) {
        return Err(NodeError::Validation("peer manifest public_host not valid".to_string()));
    }

    if !manifest.node_id_is_consistent() {
        return Err(NodeError::Validation(
            "peer manifest node_id does not match its public key".to_string(),
        ));
    }

    let dht = db::get_dht(ctx).await?;

    if !dht.contains_node(&manifest.node_id) && manifest.node_id != ctx.manifest.node_id {
        info!(node_id = %manifest.node_id, "NEW PEER");

        let peer = Peer::new(manifest.public_host, manifest.node_id, manifest.public_key);
        db::dht_add_peer(ctx, &peer).await?;
    }

    Ok(())
}

/// Seeds the DHT from the configured bootstrap peers.
pub async fn bootstrap(ctx: &NodeCtx) {
    for seed in &ctx.config.peers.bootstrap_peers {
        if let Err(e) = add_new_peer(ctx, seed).await {
            error!(peer = %seed, "Could not add bootstrap peer: {e}");
        }
    }
}

/// One gossip round over every known peer. Each peer gets our manifest as
/// an announce and answers with its own DHT view; unknown peers in that
/// view are fetched and inserted.
pub async fn gossip_round(ctx: &NodeCtx) -> Result<()> {
    let dht = db::get_dht(ctx).await?;

    for peer in &dht.0 {
        let announce = serde_json::to_string(&ctx.manifest)?;

        let response = ctx
            .http
            .get(format!("{}/api/get_dht", peer.host))
            .body(announce)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!(node_id = %peer.node_id, host = %peer.host, "could not get remote dht: {e}");
                strike_peer(ctx, &peer.node_id).await;
                continue;
            }
        };

        if let Err(e) = db::reset_unreachable_count(ctx, &peer.node_id).await {
            warn!(node_id = %peer.node_id, "could not reset unreachable count: {e}");
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(node_id = %peer.node_id, "could not read remote dht response: {e}");
                continue;
            }
        };

        let remote_dht: lib_dht::Dht = match serde_json::from_str(&body) {
            Ok(remote) => remote,
            Err(_) => {
                warn!(node_id = %peer.node_id, "could not parse remote dht");
                continue;
            }
        };

        for remote_peer in &remote_dht.0 {
            let known = dht.contains_node(&remote_peer.node_id);
            let is_self = remote_peer.node_id == ctx.manifest.node_id;

            if !known && !is_self {
                if let Err(e) = add_new_peer(ctx, &remote_peer.host).await {
                    warn!(host = %remote_peer.host, "could not add gossiped peer: {e}");
                }
            }
        }
    }

    Ok(())
}

/// Records one unreachable strike and evicts the peer at the limit.
async fn strike_peer(ctx: &NodeCtx, node_id: &str) {
    if let Err(e) = db::increment_unreachable_count(ctx, node_id).await {
        warn!(node_id = %node_id, "could not increment unreachable count: {e}");
        return;
    }

    let count = match db::get_unreachable_count(ctx, node_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!(node_id = %node_id, "could not read unreachable count: {e}");
            return;
        }
    };

    if count >= UNREACHABLE_LIMIT {
        info!(node_id = %node_id, "REMOVING PEER");
        if let Err(e) = db::dht_remove_peer(ctx, node_id).await {
            warn!(node_id = %node_id, "could not remove peer: {e}");
        }
    }
}

/// The gossip task: sleep, check the shutdown flag, run a round, repeat.
pub async fn updater_loop(ctx: Arc<NodeCtx>) {
    if !ctx.config.dht.enable_updater {
        warn!("DHT updater disabled");
        return;
    }

    let frequency = Duration::from_secs(ctx.config.dht.updater_frequency);
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

        if let Err(e) = gossip_round(&ctx).await {
            warn!("gossip round failed: {e}");
        }
    }
}
