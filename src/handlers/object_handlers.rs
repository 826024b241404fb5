//! HTTP handlers for object operations.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::AppError,
    handlers::xml_escape,
    models::object::ObjectRecord,
    services::{object_store::DEFAULT_CONTENT_TYPE, storage_service::StorageService},
    validation::validate_name,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// PUT `/{bucket}/{key}` — upload (or replace) an object.
///
/// Responds 201 for a new object and 200 when an existing one was replaced.
pub async fn upload_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    validate_name(&bucket)?;
    validate_name(&key)?;

    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let (object, replaced) = service
        .upload_object_stream(&bucket, &key, declared_length, content_type, stream)
        .await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<PutObjectResult>"#,
            r#"<Key>{}</Key>"#,
            r#"<ContentLength>{}</ContentLength>"#,
            r#"<ContentType>{}</ContentType>"#,
            r#"</PutObjectResult>"#
        ),
        xml_escape(&object.key),
        object.content_length,
        xml_escape(&object.content_type)
    );
    let mut response = Response::new(Body::from(xml));
    *response.status_mut() = if replaced {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    Ok(response)
}

/// GET `/{bucket}/{key}` — download an object as a streaming response.
pub async fn get_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    validate_name(&bucket)?;
    validate_name(&key)?;

    let (meta, file, size) = service.get_object_reader(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, size);
    Ok(response)
}

/// HEAD `/{bucket}/{key}` — same headers as GET but no body.
pub async fn head_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    validate_name(&bucket)?;
    validate_name(&key)?;

    let meta = service.get_object_metadata(&bucket, &key).await?;
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta, meta.content_length);
    Ok(response)
}

/// DELETE `/{bucket}/{key}` — remove an object.
pub async fn delete_object(
    State(service): State<StorageService>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    validate_name(&bucket)?;
    validate_name(&key)?;

    service.delete_object(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NO_CONTENT;
    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &ObjectRecord, length: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&meta.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
