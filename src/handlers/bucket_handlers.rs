//! HTTP handlers for the service root and bucket-level operations.
//!
//! Listings are rendered as XML, the way the S3 API shapes them.

use crate::{
    errors::AppError,
    handlers::{xml_escape, xml_time},
    models::bucket::Bucket,
    services::storage_service::StorageService,
    validation::validate_name,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};

/// GET `/` — list all buckets.
pub async fn list_buckets(State(service): State<StorageService>) -> Result<Response, AppError> {
    let buckets = service.list_buckets().await;
    tracing::debug!("listing {} buckets", buckets.len());
    Ok(xml_response(StatusCode::OK, build_list_buckets_xml(&buckets)))
}

/// PUT `/{bucket}` — create bucket.
pub async fn create_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    validate_name(&bucket)?;
    service.create_bucket(&bucket).await?;

    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<CreateBucketResult>"#,
            r#"<Location>/{}</Location>"#,
            r#"</CreateBucketResult>"#
        ),
        xml_escape(&bucket)
    );
    let mut response = xml_response(StatusCode::CREATED, xml);
    if let Ok(location) = HeaderValue::from_str(&format!("/{}", bucket)) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

/// DELETE `/{bucket}` — delete an empty bucket.
pub async fn delete_bucket(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    validate_name(&bucket)?;
    service.delete_bucket(&bucket).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET `/{bucket}` — bucket attributes and its objects.
pub async fn list_objects(
    State(service): State<StorageService>,
    Path(bucket): Path<String>,
) -> Result<Response, AppError> {
    validate_name(&bucket)?;
    let bucket = service.get_bucket(&bucket).await?;
    Ok(xml_response(StatusCode::OK, build_list_objects_xml(&bucket)))
}

fn xml_response(status: StatusCode, xml: String) -> Response {
    let mut response = Response::new(Body::from(xml));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/xml"),
    );
    response
}

fn build_list_buckets_xml(buckets: &[Bucket]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?><ListAllMyBucketsResult><Buckets>"#,
    );
    for bucket in buckets {
        xml.push_str("<Bucket>");
        xml.push_str(&format!("<Name>{}</Name>", xml_escape(&bucket.name)));
        xml.push_str(&format!(
            "<CreationDate>{}</CreationDate>",
            xml_time(&bucket.created_at)
        ));
        xml.push_str(&format!(
            "<LastModifiedDate>{}</LastModifiedDate>",
            xml_time(&bucket.last_modified)
        ));
        xml.push_str(&format!("<Status>{}</Status>", bucket.status()));
        xml.push_str(&format!(
            "<ObjectCount>{}</ObjectCount>",
            bucket.objects.len()
        ));
        xml.push_str("</Bucket>");
    }
    xml.push_str("</Buckets></ListAllMyBucketsResult>");
    xml
}

fn build_list_objects_xml(bucket: &Bucket) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><ListBucketResult>"#);
    xml.push_str(&format!("<Name>{}</Name>", xml_escape(&bucket.name)));
    xml.push_str(&format!(
        "<CreationDate>{}</CreationDate>",
        xml_time(&bucket.created_at)
    ));
    xml.push_str(&format!(
        "<LastModifiedDate>{}</LastModifiedDate>",
        xml_time(&bucket.last_modified)
    ));
    xml.push_str(&format!("<Status>{}</Status>", bucket.status()));
    xml.push_str(&format!("<KeyCount>{}</KeyCount>", bucket.objects.len()));

    let mut objects: Vec<_> = bucket.objects.iter().collect();
    objects.sort_by(|a, b| a.key.cmp(&b.key));
    for obj in objects {
        xml.push_str("<Contents>");
        xml.push_str(&format!("<Key>{}</Key>", xml_escape(&obj.key)));
        xml.push_str(&format!(
            "<LastModified>{}</LastModified>",
            xml_time(&obj.last_modified)
        ));
        xml.push_str(&format!("<Size>{}</Size>", obj.content_length));
        xml.push_str(&format!(
            "<ContentType>{}</ContentType>",
            xml_escape(&obj.content_type)
        ));
        xml.push_str("</Contents>");
    }

    xml.push_str("</ListBucketResult>");
    xml
}
