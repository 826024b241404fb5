//! Health & readiness handlers.
//!
//! - GET /_healthz  -> simple liveness ("ok")
//! - GET /_readyz   -> readiness that checks the registry and disk I/O
//!
//! The leading underscore keeps both paths outside the bucket namespace.

use crate::services::{object_store::STAGING_DIR, storage_service::StorageService};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, time::Duration};
use tokio::fs;
use uuid::Uuid;

/// How long readiness waits for the registry lock before reporting it stuck.
const REGISTRY_LOCK_WAIT: Duration = Duration::from_secs(2);

/// `GET /_healthz`
///
/// Very small liveness probe; always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /_readyz`
///
/// Readiness probe that:
/// 1. Takes the registry read lock within [`REGISTRY_LOCK_WAIT`] and checks
///    that `buckets.csv` on disk lists exactly the loaded buckets.
/// 2. Performs a best-effort write/read/delete in the staging directory.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(service): State<StorageService>) -> impl IntoResponse {
    let (buckets, registry_check) = match service.registry.verify(REGISTRY_LOCK_WAIT).await {
        Ok(count) => (count, (true, None)),
        Err(e) => (0, (false, Some(e.to_string()))),
    };

    let tmp_path = service
        .base_path()
        .join(STAGING_DIR)
        .join(format!("readyz-{}", Uuid::new_v4()));
    let disk_check = match fs::write(&tmp_path, b"readyz").await {
        Ok(_) => match fs::read(&tmp_path).await {
            Ok(bytes) => {
                let _ = fs::remove_file(&tmp_path).await;
                if bytes == b"readyz" {
                    (true, None)
                } else {
                    (false, Some("file content mismatch".to_string()))
                }
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path).await;
                (false, Some(format!("could not read tmp file: {}", e)))
            }
        },
        Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
    };

    let overall_ok = registry_check.0 && disk_check.0;

    let mut checks = HashMap::new();
    checks.insert(
        "registry",
        CheckStatus {
            ok: registry_check.0,
            error: registry_check.1,
        },
    );
    checks.insert(
        "disk",
        CheckStatus {
            ok: disk_check.0,
            error: disk_check.1,
        },
    );

    let body = ReadyResponse {
        status: if overall_ok { "ok".into() } else { "error".into() },
        buckets,
        checks,
    };

    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    buckets: usize,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
