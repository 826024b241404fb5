//! Defines routes for all bucket and object operations.
//!
//! ## Structure
//! - **Service root**
//!   - `GET    /` — list buckets
//!
//! - **Bucket-level endpoints**
//!   - `GET    /{bucket}` — bucket attributes and objects
//!   - `PUT    /{bucket}` — create bucket
//!   - `DELETE /{bucket}` — delete bucket
//!
//! - **Object-level endpoints**
//!   - `PUT    /{bucket}/{key}` — upload object
//!   - `GET    /{bucket}/{key}` — download object
//!   - `HEAD   /{bucket}/{key}` — retrieve metadata only
//!   - `DELETE /{bucket}/{key}` — delete object
//!
//! Keys are a single path segment. Anything deeper falls through to a 404.

use crate::{
    errors::{AppError, ErrorReport, error_body},
    handlers::{
        bucket_handlers::{create_bucket, delete_bucket, list_buckets, list_objects},
        health_handlers::{healthz, readyz},
        object_handlers::{delete_object, get_object, head_object, upload_object},
    },
    services::storage_service::StorageService,
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use tracing::{error, warn};

/// Build and return the router for all routes.
///
/// The router carries shared state (`StorageService`) to all handlers.
/// Upload size is enforced by the storage layer, so axum's body limit is off.
pub fn routes() -> Router<StorageService> {
    Router::new()
        // health endpoints; the underscore keeps them out of the bucket namespace
        .route("/_healthz", get(healthz))
        .route("/_readyz", get(readyz))
        .route("/", get(list_buckets))
        // Object-level routes
        .route(
            "/{bucket}/{key}",
            put(upload_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object),
        )
        // Bucket-level routes
        .route(
            "/{bucket}",
            get(list_objects).put(create_bucket).delete(delete_bucket),
        )
        .fallback(|| async { AppError::no_such_resource() })
        .layer(middleware::from_fn(log_failures))
        .layer(DefaultBodyLimit::disable())
}

/// Log every failed request and stamp the request path into its error body.
async fn log_failures(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let mut response = next.run(req).await;
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let report = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => report,
        None if status == StatusCode::METHOD_NOT_ALLOWED => AppError::method_not_allowed().report(),
        None => {
            // Rejections produced by axum itself (e.g. a malformed path).
            warn!(%method, %path, status = status.as_u16(), "request rejected");
            return response;
        }
    };

    if status.is_server_error() {
        error!(%method, %path, code = report.code, cause = report.cause(), "request failed");
    } else {
        warn!(%method, %path, code = report.code, cause = report.cause(), "request failed");
    }

    let (mut parts, _) = response.into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let body = error_body(status, &report, &path).into_response().into_body();
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::Registry;
    use axum::body::{self, Body};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const PNG_BODY: [u8; 12] = [
        0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d,
    ];

    async fn app() -> (TempDir, Router) {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path().join("data")).await.unwrap();
        let service = StorageService::new(Arc::new(registry));
        (dir, routes().with_state(service))
    }

    async fn send(app: &Router, method: &str, uri: &str) -> Response {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    async fn put_bytes(app: &Router, uri: &str, bytes: &[u8]) -> Response {
        let req = Request::builder()
            .method("PUT")
            .uri(uri)
            .header(header::CONTENT_LENGTH, bytes.len())
            .body(Body::from(bytes.to_vec()))
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_text(response: Response) -> String {
        String::from_utf8(body_bytes(response).await).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn create_then_list_buckets() {
        let (_dir, app) = app().await;

        let response = send(&app, "PUT", "/photos").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::LOCATION], "/photos");

        let response = send(&app, "GET", "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let xml = body_text(response).await;
        assert!(xml.contains("<Name>photos</Name>"));
        assert!(xml.contains("<Status>inactive</Status>"));

        let response = send(&app, "PUT", "/photos").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let json = body_json(response).await;
        assert_eq!(json["code"], "BucketAlreadyExists");
        assert_eq!(json["resource"], "/photos");
        assert_eq!(json["status"], 409);
    }

    #[tokio::test]
    async fn png_upload_is_sniffed_and_activates_bucket() {
        let (_dir, app) = app().await;
        send(&app, "PUT", "/photos").await;

        let response = put_bytes(&app, "/photos/cat.png", &PNG_BODY).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(body_text(response).await.contains("<ContentType>image/png</ContentType>"));

        let response = send(&app, "GET", "/photos/cat.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body_bytes(response).await, PNG_BODY);

        let response = send(&app, "GET", "/photos").await;
        assert_eq!(response.status(), StatusCode::OK);
        let xml = body_text(response).await;
        assert!(xml.contains("<Status>active</Status>"));
        assert!(xml.contains("<Key>cat.png</Key>"));
        assert!(xml.contains("<Size>12</Size>"));
    }

    #[tokio::test]
    async fn replacing_an_object_serves_the_new_bytes() {
        let (_dir, app) = app().await;
        send(&app, "PUT", "/photos").await;
        put_bytes(&app, "/photos/cat.png", &PNG_BODY).await;

        let response = put_bytes(&app, "/photos/cat.png", b"hello").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/photos/cat.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
        assert_eq!(body_text(response).await, "hello");

        let response = send(&app, "HEAD", "/photos/cat.png").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
    }

    #[tokio::test]
    async fn bucket_delete_requires_empty_bucket() {
        let (_dir, app) = app().await;
        send(&app, "PUT", "/photos").await;
        put_bytes(&app, "/photos/cat.png", &PNG_BODY).await;

        let response = send(&app, "DELETE", "/photos").await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["code"], "BucketNotEmpty");

        let response = send(&app, "DELETE", "/photos/cat.png").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, "DELETE", "/photos").await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, "GET", "/photos").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_bucket_name_is_rejected() {
        let (_dir, app) = app().await;

        let response = send(&app, "PUT", "/Invalid_Name!").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "InvalidName");

        let response = send(&app, "PUT", "/192.168.1.1").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_without_length_is_rejected() {
        let (_dir, app) = app().await;

        let response = send(&app, "PUT", "/abc/obj").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "UndefinedLength");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let (_dir, app) = app().await;

        let req = Request::builder()
            .method("PUT")
            .uri("/abc/obj")
            .header(header::CONTENT_LENGTH, (1u64 << 30) + 1)
            .body(Body::from("tiny"))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_json(response).await["code"], "EntityTooLarge");
    }

    #[tokio::test]
    async fn upload_to_missing_bucket_is_not_found() {
        let (_dir, app) = app().await;

        let response = put_bytes(&app, "/nope/obj", b"data").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NoSuchBucket");
    }

    #[tokio::test]
    async fn short_body_is_incomplete() {
        let (_dir, app) = app().await;
        send(&app, "PUT", "/photos").await;

        let req = Request::builder()
            .method("PUT")
            .uri("/photos/cut.txt")
            .header(header::CONTENT_LENGTH, 10)
            .body(Body::from("short"))
            .unwrap();
        let response = app.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "IncompleteBody");

        let response = send(&app, "GET", "/photos/cut.txt").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_method_is_not_allowed() {
        let (_dir, app) = app().await;

        let response = send(&app, "POST", "/photos").await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let json = body_json(response).await;
        assert_eq!(json["code"], "MethodNotAllowed");
        assert_eq!(json["resource"], "/photos");
    }

    #[tokio::test]
    async fn deep_paths_are_unknown_resources() {
        let (_dir, app) = app().await;

        let response = send(&app, "GET", "/a-bucket/some/key").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "NoSuchResource");
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let (_dir, app) = app().await;

        let response = send(&app, "GET", "/_healthz").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = send(&app, "GET", "/_readyz").await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["checks"]["disk"]["ok"], true);
    }

    #[tokio::test]
    async fn readiness_fails_when_catalog_drifts() {
        let (dir, app) = app().await;
        send(&app, "PUT", "/photos").await;
        std::fs::write(
            dir.path().join("data").join("buckets.csv"),
            "ghost,2024-01-01T00:00:00.000Z,2024-01-01T00:00:00.000Z,inactive\n",
        )
        .unwrap();

        let response = send(&app, "GET", "/_readyz").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["checks"]["registry"]["ok"], false);
        assert!(
            json["checks"]["registry"]["error"]
                .as_str()
                .unwrap()
                .contains("ghost")
        );
        assert_eq!(json["checks"]["disk"]["ok"], true);
    }
}
