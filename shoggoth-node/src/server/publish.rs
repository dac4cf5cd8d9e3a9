//! The chunked publish protocol.
//!
//! Three steps: negotiate an upload session, send numbered chunks, then
//! finish. Resources may be larger than any reasonable single HTTP body,
//! hence the chunking; the method is GET throughout for wire
//! compatibility with existing nodes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use lib_pins::{
    extract_tarball, validate_authorization, validate_resource_dir, Fingerprint, PinStore,
    ScratchLock,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::api::reject;
use super::rate_limit::now_ms;
use crate::context::NodeCtx;
use crate::db;
use crate::error::{NodeError, Result};

/// Every chunk except the last is exactly this many bytes.
pub const CHUNK_SIZE_LIMIT: u64 = 100_000;

const FINISH_LOCK_POLL: Duration = Duration::from_secs(1);
const FINISH_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Transient server-side state of one upload, persisted in the session
/// directory as `upload_info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadInfo {
    pub shoggoth_id: String,
    pub upload_size: u64,
    pub chunk_size_limit: u64,
    pub chunk_count: u64,
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> std::result::Result<&'a str, Response> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| reject(format!("no {name} header in publish request")))
}

fn required_u64_header(headers: &HeaderMap, name: &str) -> std::result::Result<u64, Response> {
    required_header(headers, name)?
        .parse::<u64>()
        .map_err(|_| reject(format!("invalid {name} header in publish request")))
}

/// Whether an incoming fingerprint replaces the already-pinned one: the
/// hashes must differ and the incoming timestamp must be strictly newer.
/// Timestamps compare as integers.
pub fn should_replace(existing: &Fingerprint, incoming: &Fingerprint) -> Result<bool> {
    Ok(existing.hash != incoming.hash && incoming.timestamp_ms()? > existing.timestamp_ms()?)
}

fn session_dir(ctx: &NodeCtx, upload_id: &str) -> std::result::Result<PathBuf, Response> {
    // Upload ids are UUIDs; anything else cannot address into tmp/.
    if Uuid::parse_str(upload_id).is_err() {
        return Err(reject("invalid upload-id header in publish request"));
    }

    Ok(ctx.node_tmp_path().join(upload_id))
}

/// Step 1: validate the declared upload and allocate a session.
pub async fn negotiate(State(ctx): State<Arc<NodeCtx>>, headers: HeaderMap) -> Response {
    if !ctx.config.pins.allow_publish {
        return reject("this node has disabled publishing profiles");
    }

    let shoggoth_id = match required_header(&headers, "shoggoth-id") {
        Ok(value) => value.to_string(),
        Err(response) => return response,
    };
    let chunk_count = match required_u64_header(&headers, "chunk-count") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let chunk_size_limit = match required_u64_header(&headers, "chunk-size-limit") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let upload_size = match required_u64_header(&headers, "upload-size") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let fingerprint_text = match required_header(&headers, "fingerprint") {
        Ok(value) => value.to_string(),
        Err(response) => return response,
    };
    let signature = match required_header(&headers, "signature") {
        Ok(value) => value.to_string(),
        Err(response) => return response,
    };

    if !lib_crypto::is_valid_shoggoth_id(&shoggoth_id) {
        return reject("invalid Shoggoth ID");
    }

    if chunk_size_limit != CHUNK_SIZE_LIMIT {
        return reject(format!("received chunk-size-limit does not equal {CHUNK_SIZE_LIMIT}"));
    }

    if chunk_count == 0 {
        return reject("chunk count must be greater than zero");
    }

    let caps = ctx.caps();

    if upload_size > caps.resource_limit {
        return reject(format!(
            "Sorry, your profile is larger than the maximum profile size for this node.\nLimit: {} bytes\nYour profile: {} bytes",
            caps.resource_limit, upload_size
        ));
    }

    let current_total = match ctx.pin_store().total_size() {
        Ok(total) => total,
        Err(e) => return reject(NodeError::from(e).to_string()),
    };

    if upload_size.saturating_add(current_total) > caps.total_limit {
        return reject(format!(
            "Sorry, the node storage is full. consider reducing the size of your profile\n\nYour profile: {} bytes",
            upload_size
        ));
    }

    let fingerprint = match Fingerprint::from_json(&fingerprint_text) {
        Ok(fingerprint) => fingerprint,
        Err(e) => return reject(e.to_string()),
    };

    match fingerprint.check_timestamp_window(now_ms()) {
        Ok(Ok(())) => {}
        Ok(Err(skew)) => return reject(skew.message()),
        Err(e) => return reject(e.to_string()),
    }

    // Already-published shortcut: an unchanged resource never opens a
    // session.
    let pin_store = ctx.pin_store();
    if pin_store.has_pin(&shoggoth_id) {
        let existing = match pin_store.read_fingerprint(&shoggoth_id) {
            Ok(existing) => existing,
            Err(e) => return reject(e.to_string()),
        };

        match should_replace(&existing, &fingerprint) {
            Ok(true) => {}
            Ok(false) => {
                return reject("Your profile has already been published and no changes were detected")
            }
            Err(e) => return reject(e.to_string()),
        }
    }

    let upload_id = Uuid::new_v4().to_string();

    if let Err(e) = allocate_session(&ctx, &upload_id, &shoggoth_id, upload_size, chunk_count, &fingerprint_text, &signature) {
        return reject(e.to_string());
    }

    (StatusCode::OK, upload_id).into_response()
}

fn allocate_session(
    ctx: &NodeCtx,
    upload_id: &str,
    shoggoth_id: &str,
    upload_size: u64,
    chunk_count: u64,
    fingerprint_text: &str,
    signature: &str,
) -> Result<()> {
    let session = ctx.node_tmp_path().join(upload_id);
    std::fs::create_dir_all(session.join("chunks"))?;

    std::fs::write(session.join("signature.txt"), signature)?;
    std::fs::write(session.join("fingerprint.json"), fingerprint_text)?;

    let info = UploadInfo {
        shoggoth_id: shoggoth_id.to_string(),
        upload_size,
        chunk_size_limit: CHUNK_SIZE_LIMIT,
        chunk_count,
    };
    std::fs::write(session.join("upload_info.json"), serde_json::to_string(&info)?)?;

    Ok(())
}

fn read_session_info(session: &std::path::Path) -> Result<UploadInfo> {
    let text = std::fs::read_to_string(session.join("upload_info.json"))?;
    Ok(serde_json::from_str(&text)?)
}

/// Step 2: store one numbered chunk of the upload.
pub async fn receive_chunk(
    State(ctx): State<Arc<NodeCtx>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !ctx.config.pins.allow_publish {
        return reject("this node has disabled publishing profiles");
    }

    let upload_id = match required_header(&headers, "upload-id") {
        Ok(value) => value.to_string(),
        Err(response) => return response,
    };
    let chunk_id = match required_u64_header(&headers, "chunk-id") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let chunk_size = match required_u64_header(&headers, "chunk-size") {
        Ok(value) => value,
        Err(response) => return response,
    };

    let session = match session_dir(&ctx, &upload_id) {
        Ok(session) => session,
        Err(response) => return response,
    };

    if !session.is_dir() {
        return reject("upload path does not exist");
    }

    if body.len() as u64 != chunk_size {
        return reject("request body size should be equal to the chunk-size header");
    }

    let info = match read_session_info(&session) {
        Ok(info) => info,
        Err(e) => return reject(e.to_string()),
    };

    if chunk_id >= info.chunk_count {
        return reject("chunk id is greater than chunk count");
    }

    let valid_size = if chunk_id == info.chunk_count - 1 {
        chunk_size <= CHUNK_SIZE_LIMIT
    } else {
        chunk_size == CHUNK_SIZE_LIMIT
    };

    if !valid_size {
        return reject("invalid chunk size");
    }

    if let Err(e) = std::fs::write(session.join("chunks").join(chunk_id.to_string()), &body) {
        return reject(e.to_string());
    }

    StatusCode::OK.into_response()
}

/// Step 3: reassemble the tarball, run the acceptance procedure and
/// destroy the session.
pub async fn finish(State(ctx): State<Arc<NodeCtx>>, headers: HeaderMap) -> Response {
    if !ctx.config.pins.allow_publish {
        return reject("this node has disabled publishing profiles");
    }

    let upload_id = match required_header(&headers, "upload-id") {
        Ok(value) => value.to_string(),
        Err(response) => return response,
    };

    let session = match session_dir(&ctx, &upload_id) {
        Ok(session) => session,
        Err(response) => return response,
    };

    if !session.is_dir() {
        return reject("upload path does not exist");
    }

    let info = match read_session_info(&session) {
        Ok(info) => info,
        Err(e) => return reject(e.to_string()),
    };

    let fingerprint_text = match std::fs::read_to_string(session.join("fingerprint.json")) {
        Ok(text) => text,
        Err(e) => return reject(e.to_string()),
    };
    let signature = match std::fs::read_to_string(session.join("signature.txt")) {
        Ok(text) => text,
        Err(e) => return reject(e.to_string()),
    };

    let tarball = ctx.node_tmp_path().join(format!("{}.tar", info.shoggoth_id));

    let _lock = match ScratchLock::acquire(&tarball, FINISH_LOCK_POLL, FINISH_LOCK_TIMEOUT).await {
        Ok(lock) => lock,
        Err(e) => {
            let _ = std::fs::remove_dir_all(&session);
            return reject(NodeError::from(e).to_string());
        }
    };

    let assembled = assemble_chunks(&session, &info, &tarball);

    // The session is destroyed unconditionally before the response.
    let _ = std::fs::remove_dir_all(&session);

    if let Err(e) = assembled {
        let _ = std::fs::remove_file(&tarball);
        return reject(e.to_string());
    }

    let fingerprint = match Fingerprint::from_json(&fingerprint_text) {
        Ok(fingerprint) => fingerprint,
        Err(e) => {
            let _ = std::fs::remove_file(&tarball);
            return reject(e.to_string());
        }
    };

    if fingerprint.shoggoth_id != info.shoggoth_id {
        let _ = std::fs::remove_file(&tarball);
        return reject("fingerprint shoggoth_id does not match the negotiated upload");
    }

    process_pin_request(&ctx, &info.shoggoth_id, &fingerprint, &fingerprint_text, &signature).await
}

fn assemble_chunks(session: &std::path::Path, info: &UploadInfo, tarball: &std::path::Path) -> Result<()> {
    use std::io::Write;

    let mut output = std::fs::File::create(tarball)?;

    for chunk_id in 0..info.chunk_count {
        let chunk = std::fs::read(session.join("chunks").join(chunk_id.to_string()))
            .map_err(|_| NodeError::Validation(format!("upload is missing chunk {chunk_id}")))?;
        output.write_all(&chunk)?;
    }

    output.flush()?;
    Ok(())
}

/// The acceptance procedure shared by publish and update: authorize the
/// tarball, then install it through a sibling swap.
async fn process_pin_request(
    ctx: &NodeCtx,
    shoggoth_id: &str,
    fingerprint: &Fingerprint,
    fingerprint_text: &str,
    signature: &str,
) -> Response {
    let tmp_path = ctx.node_tmp_path();
    let tarball = tmp_path.join(format!("{shoggoth_id}.tar"));
    let tmp_dir = tmp_path.join(shoggoth_id);

    let result = accept_pin(ctx, shoggoth_id, fingerprint, fingerprint_text, signature, &tarball, &tmp_dir).await;

    let _ = std::fs::remove_file(&tarball);
    let _ = std::fs::remove_dir_all(&tmp_dir);

    match result {
        Ok(response) => response,
        Err(e) => reject(e.to_string()),
    }
}

async fn accept_pin(
    ctx: &NodeCtx,
    shoggoth_id: &str,
    fingerprint: &Fingerprint,
    fingerprint_text: &str,
    signature: &str,
    tarball: &std::path::Path,
    tmp_dir: &std::path::Path,
) -> Result<Response> {
    let tmp_path = ctx.node_tmp_path();

    validate_authorization(&tmp_path, tarball, fingerprint, fingerprint_text, signature)?;

    extract_tarball(tarball, tmp_dir)?;
    validate_resource_dir(tmp_dir)?;

    let pin_store = ctx.pin_store();
    let final_dir = pin_store.pin_dir(shoggoth_id);
    let is_update = pin_store.has_pin(shoggoth_id);

    if is_update {
        let existing = pin_store.read_fingerprint(shoggoth_id)?;

        if !should_replace(&existing, fingerprint)? {
            return Ok(reject("Your profile has already been published and no changes were detected"));
        }
    }

    let mut new_name = final_dir.as_os_str().to_os_string();
    new_name.push(".new");
    let new_dir = PathBuf::from(new_name);

    extract_tarball(tarball, &new_dir)?;
    PinStore::write_metadata(&new_dir, fingerprint_text, signature)?;
    PinStore::swap_in(&new_dir, &final_dir)?;

    if is_update {
        info!(shoggoth_id = %shoggoth_id, "PIN UPDATED");
        Ok((StatusCode::ACCEPTED, "update complete").into_response())
    } else {
        db::pins_add(ctx, shoggoth_id).await?;
        info!(shoggoth_id = %shoggoth_id, "NEW PIN PUBLISHED");
        Ok((StatusCode::OK, "publish complete").into_response())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint(hash: &str, timestamp: u64) -> Fingerprint {
        Fingerprint {
            hash: hash.to_string(),
            public_key: "key".to_string(),
            shoggoth_id: "SHOGaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".to_string(),
            timestamp: timestamp.to_string(),
        }
    }

    #[test]
    fn unchanged_hash_never_replaces() {
        let existing = fingerprint("same", 100);
        let incoming = fingerprint("same", 200);

        assert!(!should_replace(&existing, &incoming).unwrap());
    }

    #[test]
    fn newer_timestamp_with_different_hash_replaces() {
        let existing = fingerprint("old", 100);
        let incoming = fingerprint("new", 101);

        assert!(should_replace(&existing, &incoming).unwrap());
    }

    #[test]
    fn equal_or_older_timestamp_never_replaces() {
        let existing = fingerprint("old", 100);

        assert!(!should_replace(&existing, &fingerprint("new", 100)).unwrap());
        assert!(!should_replace(&existing, &fingerprint("new", 99)).unwrap());
    }

    #[test]
    fn timestamps_compare_as_integers_not_strings() {
        // "9" > "10" as strings; as integers 9 < 10.
        let existing = fingerprint("old", 9);
        let incoming = fingerprint("new", 10);

        assert!(should_replace(&existing, &incoming).unwrap());
    }
}
