use std::sync::Arc;

use serde::Serialize;
use zbus::interface;

use crate::service::{FaceSeek, FindRequest, ServiceError};

/// D-Bus surface for the face search daemon.
///
/// Bus name: org.faceseek.FaceSeek1
/// Object path: /org/faceseek/FaceSeek1
///
/// Methods take and return JSON strings. Every reply is an object with a
/// `success` flag; failures carry `kind` and `error` instead of a payload,
/// so no error leaves the daemon untagged.
pub struct FaceSeekService {
    service: Arc<FaceSeek>,
}

impl FaceSeekService {
    pub fn new(service: Arc<FaceSeek>) -> Self {
        Self { service }
    }
}

fn reply<T: Serialize>(result: Result<T, ServiceError>) -> String {
    let value = match result {
        Ok(payload) => match serde_json::to_value(&payload) {
            Ok(json) => serde_json::json!({ "success": true, "result": json }),
            Err(e) => serde_json::json!({
                "success": false,
                "kind": "store_io",
                "error": format!("failed to serialize reply: {e}"),
            }),
        },
        Err(e) => serde_json::json!({
            "success": false,
            "kind": e.kind(),
            "error": e.to_string(),
        }),
    };
    value.to_string()
}

fn bad_request(e: serde_json::Error) -> String {
    serde_json::json!({
        "success": false,
        "kind": "invalid_input",
        "error": format!("malformed request: {e}"),
    })
    .to_string()
}

#[interface(name = "org.faceseek.FaceSeek1")]
impl FaceSeekService {
    /// Analyze and cache a JSON array of source identifiers.
    async fn embed(&self, sources: &str) -> zbus::fdo::Result<String> {
        tracing::info!("embed requested");
        let sources: Vec<String> = match serde_json::from_str(sources) {
            Ok(sources) => sources,
            Err(e) => return Ok(bad_request(e)),
        };
        Ok(reply(Ok(self.service.embed(&sources).await)))
    }

    /// Search scope images for the target's face(s). The request is a JSON
    /// object: `{target, scope, threshold?, policy?, include_details?,
    /// max_results?}`.
    async fn find_in(&self, request: &str) -> zbus::fdo::Result<String> {
        tracing::info!("find_in requested");
        let request: FindRequest = match serde_json::from_str(request) {
            Ok(request) => request,
            Err(e) => return Ok(bad_request(e)),
        };
        Ok(reply(self.service.find_in(request).await))
    }

    /// Face metadata for one source.
    async fn inspect(&self, identifier: &str, cached_only: bool) -> zbus::fdo::Result<String> {
        tracing::info!(identifier, cached_only, "inspect requested");
        Ok(reply(self.service.inspect(identifier, cached_only).await))
    }

    async fn cache_stats(&self) -> zbus::fdo::Result<String> {
        Ok(reply(self.service.cache_stats().await))
    }

    async fn cache_clear(&self) -> zbus::fdo::Result<String> {
        tracing::info!("cache_clear requested");
        let result = self
            .service
            .cache_clear()
            .await
            .map(|removed| serde_json::json!({ "removed": removed }));
        Ok(reply(result))
    }

    /// Remove cache entries whose sources are no longer reachable.
    async fn cache_cleanup(&self) -> zbus::fdo::Result<String> {
        tracing::info!("cache_cleanup requested");
        Ok(reply(self.service.cache_cleanup().await))
    }

    /// Daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let stats = self.service.cache_stats().await;
        Ok(serde_json::json!({
            "success": true,
            "result": {
                "version": env!("CARGO_PKG_VERSION"),
                "cache": match stats {
                    Ok(stats) => serde_json::json!({
                        "entries": stats.total_entries,
                        "faces": stats.total_faces,
                    }),
                    Err(e) => serde_json::json!({ "error": e.to_string() }),
                },
            },
        })
        .to_string())
    }
}
