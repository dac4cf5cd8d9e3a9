//! API route handlers consumed by peers and clients.
//!
//! Recoverable errors become 406 responses with the error text as the
//! body. A clone or download of a resource this node does not hold is
//! answered with a 302 to a peer that advertises it, which is what turns
//! the federation into a coherent content-addressed fabric.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use lib_dht::NodeManifest;
use lib_pins::{copy_dir, create_tarball, ScratchLock, METADATA_DIR, RESOURCE_GROUPS};
use tracing::{debug, warn};

use crate::context::NodeCtx;
use crate::db;
use crate::dht;
use crate::error::{NodeError, Result};

const CLONE_LOCK_POLL: Duration = Duration::from_secs(1);
const CLONE_LOCK_TIMEOUT: Duration = Duration::from_secs(20);

/// A recoverable handler failure: 406 with the error text.
pub fn reject(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_ACCEPTABLE,
        [("Access-Control-Allow-Origin", "*")],
        message.into(),
    )
        .into_response()
}

/// A peer-manifest request body doubles as an announce: learn the sender.
fn absorb_announce(ctx: Arc<NodeCtx>, body: String) {
    if body.is_empty() {
        return;
    }

    let manifest: NodeManifest = match serde_json::from_str(&body) {
        Ok(manifest) => manifest,
        Err(_) => return,
    };

    tokio::spawn(async move {
        if let Err(e) = dht::add_new_peer(&ctx, &manifest.public_host).await {
            debug!(host = %manifest.public_host, "could not absorb peer announce: {e}");
        }
    });
}

pub async fn get_manifest(State(ctx): State<Arc<NodeCtx>>, body: String) -> Response {
    absorb_announce(ctx.clone(), body);

    match serde_json::to_string(&ctx.manifest) {
        Ok(manifest) => json_response(manifest),
        Err(e) => reject(e.to_string()),
    }
}

pub async fn get_dht(State(ctx): State<Arc<NodeCtx>>, body: String) -> Response {
    absorb_announce(ctx.clone(), body);

    match db::get_dht_value(&ctx).await {
        Ok(value) => json_response(value.to_string()),
        Err(e) => reject(e.to_string()),
    }
}

pub async fn get_pins(State(ctx): State<Arc<NodeCtx>>) -> Response {
    match db::get_pins_value(&ctx).await {
        Ok(value) => json_response(value.to_string()),
        Err(e) => reject(e.to_string()),
    }
}

fn json_response(body: String) -> Response {
    (
        StatusCode::OK,
        [
            ("Content-Type", "application/json"),
            ("Access-Control-Allow-Origin", "*"),
        ],
        body,
    )
        .into_response()
}

pub async fn get_fingerprint(
    State(ctx): State<Arc<NodeCtx>>,
    Path(shoggoth_id): Path<String>,
) -> Response {
    if !lib_crypto::is_valid_shoggoth_id(&shoggoth_id) {
        return reject("invalid Shoggoth ID");
    }

    match ctx.pin_store().read_fingerprint_text(&shoggoth_id) {
        Ok(text) => json_response(text),
        Err(e) => reject(e.to_string()),
    }
}

/// What a clone/download request addresses inside a pin.
#[derive(Debug, Clone)]
enum Target {
    Profile,
    Group(String),
    Resource { group: String, resource: String },
}

impl Target {
    fn group(&self) -> Option<&str> {
        match self {
            Target::Profile => None,
            Target::Group(group) => Some(group),
            Target::Resource { group, .. } => Some(group),
        }
    }

    fn resource(&self) -> Option<&str> {
        match self {
            Target::Resource { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Scratch name shared by the tmp copy and the tarball.
    fn scratch_name(&self, shoggoth_id: &str) -> String {
        match self {
            Target::Profile => shoggoth_id.to_string(),
            Target::Group(group) => format!("{shoggoth_id}.{group}"),
            Target::Resource { group, resource } => format!("{shoggoth_id}.{group}.{resource}"),
        }
    }
}

/// Which route family the request came in on, for redirect locations.
#[derive(Debug, Clone, Copy)]
enum RouteKind {
    Clone,
    Download,
}

impl RouteKind {
    fn location(&self, shoggoth_id: &str, target: &Target) -> String {
        match (self, target) {
            (RouteKind::Clone, Target::Profile) => format!("/api/clone/{shoggoth_id}"),
            (RouteKind::Clone, Target::Group(group)) => format!("/api/clone/{shoggoth_id}/{group}"),
            (RouteKind::Clone, Target::Resource { group, resource }) => {
                format!("/api/clone/{shoggoth_id}/{group}/{resource}")
            }
            (RouteKind::Download, Target::Resource { group, resource }) => {
                format!("/api/download/{shoggoth_id}/{group}/{resource}.tar")
            }
            (RouteKind::Download, _) => format!("/api/clone/{shoggoth_id}"),
        }
    }
}

pub async fn clone_profile(State(ctx): State<Arc<NodeCtx>>, Path(shoggoth_id): Path<String>) -> Response {
    serve_target(ctx, shoggoth_id, Target::Profile, RouteKind::Clone).await
}

pub async fn clone_group(
    State(ctx): State<Arc<NodeCtx>>,
    Path((shoggoth_id, group)): Path<(String, String)>,
) -> Response {
    serve_target(ctx, shoggoth_id, Target::Group(group), RouteKind::Clone).await
}

pub async fn clone_resource(
    State(ctx): State<Arc<NodeCtx>>,
    Path((shoggoth_id, group, resource)): Path<(String, String, String)>,
) -> Response {
    serve_target(ctx, shoggoth_id, Target::Resource { group, resource }, RouteKind::Clone).await
}

pub async fn download_resource(
    State(ctx): State<Arc<NodeCtx>>,
    Path((shoggoth_id, group, resource)): Path<(String, String, String)>,
) -> Response {
    let Some(resource) = resource.strip_suffix(".tar") else {
        return reject("invalid resource name");
    };

    let resource = resource.to_string();
    serve_target(ctx, shoggoth_id, Target::Resource { group, resource }, RouteKind::Download).await
}

async fn serve_target(ctx: Arc<NodeCtx>, shoggoth_id: String, target: Target, kind: RouteKind) -> Response {
    if !lib_crypto::is_valid_shoggoth_id(&shoggoth_id) {
        return reject("invalid Shoggoth ID");
    }

    if let Some(group) = target.group() {
        if !RESOURCE_GROUPS.contains(&group) {
            return reject("invalid group name");
        }
    }

    if let Some(resource) = target.resource() {
        if resource.is_empty() || resource.contains('/') || resource.contains('\\') || resource.contains("..") {
            return reject("invalid resource name");
        }
    }

    let pin_store = ctx.pin_store();

    if !pin_store.has_pin(&shoggoth_id) {
        return redirect_on_miss(&ctx, &shoggoth_id, &kind.location(&shoggoth_id, &target)).await;
    }

    let pin_dir = pin_store.pin_dir(&shoggoth_id);
    let target_dir = match &target {
        Target::Profile => pin_dir.clone(),
        Target::Group(group) => pin_dir.join(group),
        Target::Resource { group, resource } => pin_dir.join(group).join(resource),
    };

    if target.resource().is_some() && !target_dir.is_dir() {
        return (StatusCode::NOT_FOUND, "the resource was not found").into_response();
    }

    let scratch_name = target.scratch_name(&shoggoth_id);
    let tmp_copy = ctx.node_tmp_path().join(&scratch_name);
    let tarball = ctx.node_tmp_path().join(format!("{scratch_name}.tar"));

    let _lock = match ScratchLock::acquire(&tmp_copy, CLONE_LOCK_POLL, CLONE_LOCK_TIMEOUT).await {
        Ok(lock) => lock,
        Err(e) => return reject(NodeError::from(e).to_string()),
    };

    let result = build_tarball_response(&pin_dir, &target_dir, &target, &tmp_copy, &tarball);

    let _ = std::fs::remove_dir_all(&tmp_copy);
    let _ = std::fs::remove_file(&tarball);

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(shoggoth_id = %shoggoth_id, "could not serve resource: {e}");
            reject(e.to_string())
        }
    }
}

/// Packs the target directory and answers with the tarball bytes plus the
/// `fingerprint` and `signature` headers that authenticate them.
fn build_tarball_response(
    pin_dir: &std::path::Path,
    target_dir: &std::path::Path,
    target: &Target,
    tmp_copy: &PathBuf,
    tarball: &PathBuf,
) -> Result<Response> {
    copy_dir(target_dir, tmp_copy)?;

    // Profile and group tarballs are hashed without their own
    // authentication files, so strip them from the copy.
    if target.resource().is_none() {
        let metadata_dir = tmp_copy.join(METADATA_DIR);
        let _ = std::fs::remove_file(metadata_dir.join("fingerprint.json"));
        let _ = std::fs::remove_file(metadata_dir.join("signature.txt"));
    }

    create_tarball(tmp_copy, tarball)?;
    let bytes = std::fs::read(tarball)?;

    let (fingerprint_path, signature_path) = metadata_sources(pin_dir, target);
    let fingerprint = std::fs::read_to_string(fingerprint_path)?;
    let signature = std::fs::read_to_string(signature_path)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        "Content-Type",
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        "fingerprint",
        HeaderValue::from_str(fingerprint.trim())
            .map_err(|_| NodeError::Validation("fingerprint is not header-safe".to_string()))?,
    );
    headers.insert(
        "signature",
        HeaderValue::from_str(signature.trim())
            .map_err(|_| NodeError::Validation("signature is not header-safe".to_string()))?,
    );

    Ok((StatusCode::OK, headers, bytes).into_response())
}

fn metadata_sources(pin_dir: &std::path::Path, target: &Target) -> (PathBuf, PathBuf) {
    match target {
        Target::Profile => (
            pin_dir.join(METADATA_DIR).join("fingerprint.json"),
            pin_dir.join(METADATA_DIR).join("signature.txt"),
        ),
        Target::Group(group) => (
            pin_dir.join(group).join(METADATA_DIR).join("fingerprint.json"),
            pin_dir.join(group).join(METADATA_DIR).join("signature.txt"),
        ),
        Target::Resource { group, resource } => {
            let fingerprints = pin_dir.join(group).join(METADATA_DIR).join("fingerprints").join(resource);
            (fingerprints.join("fingerprint.json"), fingerprints.join("signature.txt"))
        }
    }
}

/// The redirect-on-miss contract: point the client at any peer whose
/// advertised pins contain the requested ID, or reject.
async fn redirect_on_miss(ctx: &NodeCtx, shoggoth_id: &str, path: &str) -> Response {
    let peers = match db::get_peers_with_pin(ctx, shoggoth_id).await {
        Ok(peers) => peers,
        Err(e) => return reject(e.to_string()),
    };

    match peers.first() {
        Some(peer) => {
            let location = format!("{}{}", peer.host, path);
            match HeaderValue::from_str(&location) {
                Ok(value) => {
                    let mut headers = HeaderMap::new();
                    headers.insert("Location", value);
                    (StatusCode::FOUND, headers).into_response()
                }
                Err(_) => reject("peer host is not header-safe"),
            }
        }
        None => StatusCode::NOT_ACCEPTABLE.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_locations_mirror_the_request_shape() {
        let id = "SHOGaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

        assert_eq!(RouteKind::Clone.location(id, &Target::Profile), format!("/api/clone/{id}"));
        assert_eq!(
            RouteKind::Clone.location(id, &Target::Group("code".into())),
            format!("/api/clone/{id}/code")
        );
        assert_eq!(
            RouteKind::Clone.location(
                id,
                &Target::Resource { group: "models".into(), resource: "gpt2".into() }
            ),
            format!("/api/clone/{id}/models/gpt2")
        );
        assert_eq!(
            RouteKind::Download.location(
                id,
                &Target::Resource { group: "code".into(), resource: "repo".into() }
            ),
            format!("/api/download/{id}/code/repo.tar")
        );
    }

    #[test]
    fn scratch_names_are_distinct_per_target() {
        let id = "SHOGaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

        assert_eq!(Target::Profile.scratch_name(id), id);
        assert_eq!(Target::Group("code".into()).scratch_name(id), format!("{id}.code"));
        assert_eq!(
            Target::Resource { group: "code".into(), resource: "repo".into() }.scratch_name(id),
            format!("{id}.code.repo")
        );
    }
}
