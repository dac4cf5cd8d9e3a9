//! Store-level operations on the `dht` and `pins` documents.
//!
//! The store is the single source of truth; every operation here reads or
//! writes it directly, so there is no node-local coherence window. Partial
//! reads and writes address into the documents with JSONPath filters.

use lib_dht::{Dht, Peer};
use serde_json::{json, Value};
use tracing::warn;

use crate::context::NodeCtx;
use crate::error::{NodeError, Result};

/// The whole DHT document as parsed peers.
pub async fn get_dht(ctx: &NodeCtx) -> Result<Dht> {
    let value = get_dht_value(ctx).await?;
    Ok(serde_json::from_value(value)?)
}

/// The whole DHT document as raw JSON.
pub async fn get_dht_value(ctx: &NodeCtx) -> Result<Value> {
    match ctx.store.get("dht").await? {
        Value::Null => Ok(json!([])),
        value => Ok(value),
    }
}

/// The PinIndex document as raw JSON.
pub async fn get_pins_value(ctx: &NodeCtx) -> Result<Value> {
    match ctx.store.get("pins").await? {
        Value::Null => Ok(json!([])),
        value => Ok(value),
    }
}

/// The PinIndex as a list of ShoggothIDs.
pub async fn get_pins(ctx: &NodeCtx) -> Result<Vec<String>> {
    Ok(serde_json::from_value(get_pins_value(ctx).await?)?)
}

pub async fn dht_add_peer(ctx: &NodeCtx, peer: &Peer) -> Result<()> {
    let item = serde_json::to_value(peer)?;
    ctx.store.json_append("dht", "$", &item).await?;
    Ok(())
}

pub async fn dht_remove_peer(ctx: &NodeCtx, node_id: &str) -> Result<()> {
    let filter = format!(r#"$[?(@.node_id == "{node_id}")]"#);
    ctx.store.json_delete("dht", &filter).await?;
    Ok(())
}

pub async fn increment_unreachable_count(ctx: &NodeCtx, node_id: &str) -> Result<()> {
    let path = format!(r#"$[?(@.node_id == "{node_id}")].unreachable_count"#);
    ctx.store.json_increment("dht", &path, 1).await?;
    Ok(())
}

pub async fn reset_unreachable_count(ctx: &NodeCtx, node_id: &str) -> Result<()> {
    let path = format!(r#"$[?(@.node_id == "{node_id}")].unreachable_count"#);
    ctx.store.json_set("dht", &path, &json!(0)).await?;
    Ok(())
}

pub async fn get_unreachable_count(ctx: &NodeCtx, node_id: &str) -> Result<u64> {
    let path = format!(r#"$[?(@.node_id == "{node_id}")].unreachable_count"#);
    let value = ctx.store.json_get("dht", &path).await?;

    // JSONPath results arrive as a match list.
    let count = match &value {
        Value::Array(items) => items.first().and_then(Value::as_u64),
        other => other.as_u64(),
    };

    count.ok_or_else(|| {
        NodeError::Protocol(format!("unexpected unreachable_count reply: {value}"))
    })
}

pub async fn pins_add(ctx: &NodeCtx, shoggoth_id: &str) -> Result<()> {
    ctx.store.json_append("pins", "$", &json!(shoggoth_id)).await?;
    Ok(())
}

pub async fn pins_remove(ctx: &NodeCtx, shoggoth_id: &str) -> Result<()> {
    let filter = format!(r#"$[?(@ == "{shoggoth_id}")]"#);
    ctx.store.json_delete("pins", &filter).await?;
    Ok(())
}

/// Peers whose advertised pins contain the given ShoggothID.
pub async fn get_peers_with_pin(ctx: &NodeCtx, shoggoth_id: &str) -> Result<Vec<Peer>> {
    let filter = format!(r#"$[?(@.pins[?(@=="{shoggoth_id}")])]"#);
    let value = ctx.store.json_get("dht", &filter).await?;

    match value {
        Value::Null => Ok(Vec::new()),
        value => Ok(serde_json::from_value(value)?),
    }
}

pub async fn clear_peer_pins(ctx: &NodeCtx, node_id: &str) -> Result<()> {
    let path = format!(r#"$[?(@.node_id=="{node_id}")].pins"#);
    ctx.store.json_set("dht", &path, &json!([])).await?;
    Ok(())
}

pub async fn peer_pins_add(ctx: &NodeCtx, node_id: &str, shoggoth_id: &str) -> Result<()> {
    let path = format!(r#"$[?(@.node_id=="{node_id}")].pins"#);
    ctx.store.json_append("dht", &path, &json!(shoggoth_id)).await?;
    Ok(())
}

/// Initializes the `dht` and `pins` documents when absent and reconciles
/// the PinIndex with the on-disk pin tree. Returns true when the DHT was
/// freshly initialized, in which case the caller bootstraps it.
pub async fn verify_data(ctx: &NodeCtx) -> Result<bool> {
    let dht_initialized = match ctx.store.get("dht").await? {
        Value::Null => {
            ctx.store.set("dht", &json!([])).await?;
            true
        }
        _ => false,
    };

    ctx.store.set("pins", &json!([])).await?;

    for pin in ctx.pin_store().list_pins()? {
        if let Err(e) = pins_add(ctx, &pin).await {
            warn!(pin = %pin, error = %e, "could not register on-disk pin in the store");
        }
    }

    Ok(dht_initialized)
}
