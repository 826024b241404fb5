//! HTTP handlers, one module per resource level.

pub mod bucket_handlers;
pub mod health_handlers;
pub mod object_handlers;

use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub(crate) fn xml_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}
