//! Response construction.

use crate::error::ErrorKind;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Response, StatusCode};
use httpdate::{fmt_http_date, parse_http_date};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use time::OffsetDateTime;

/// Resource bytes ready to be sent.
#[derive(Debug)]
pub(crate) struct Resource {
    pub(crate) id: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) content_type: String,
    pub(crate) last_modified: SystemTime,
}

impl Resource {
    /// A body-less resource carrying only what conditional requests are
    /// checked against.
    pub(crate) fn validators(id: &str, last_modified: SystemTime) -> Self {
        Self { id: id.to_string(), bytes: Vec::new(), content_type: String::new(), last_modified }
    }

    pub(crate) fn etag(&self) -> String {
        format!("\"{}\"", self.id)
    }

    /// Whether the client's conditional headers say it already has this.
    /// `If-None-Match` takes precedence over `If-Modified-Since`.
    pub(crate) fn is_fresh(&self, headers: &HeaderMap) -> bool {
        if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH) {
            let etag = self.etag();
            return if_none_match.to_str().is_ok_and(|value| {
                value.split(',').map(str::trim).any(|tag| tag == "*" || tag.trim_start_matches("W/") == etag)
            });
        }
        headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| parse_http_date(value).ok())
            .is_some_and(|since| truncate(self.last_modified) <= since)
    }
}

pub(crate) fn system_time(timestamp: OffsetDateTime) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(u64::try_from(timestamp.unix_timestamp()).unwrap_or(0))
}

// HTTP dates have one second resolution.
fn truncate(time: SystemTime) -> SystemTime {
    let seconds = time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    UNIX_EPOCH + Duration::from_secs(seconds)
}

pub(crate) fn resource(resource: Resource, max_age: u64) -> Response<Vec<u8>> {
    let mut response = Response::new(Vec::new());
    caching_headers(response.headers_mut(), &resource, max_age);
    set(response.headers_mut(), header::CONTENT_TYPE, &resource.content_type);
    *response.body_mut() = resource.bytes;
    response
}

pub(crate) fn not_modified(resource: &Resource, max_age: u64) -> Response<Vec<u8>> {
    let mut response = Response::new(Vec::new());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    caching_headers(response.headers_mut(), resource, max_age);
    response
}

pub(crate) fn asset(content_type: &str, data: Vec<u8>) -> Response<Vec<u8>> {
    let mut response = Response::new(data);
    set(response.headers_mut(), header::CONTENT_TYPE, content_type);
    response
}

/// Error responses carry only the status reason, never error details.
pub(crate) fn error(kind: &ErrorKind) -> Response<Vec<u8>> {
    let status = kind.status();
    let mut response = Response::new(status.canonical_reason().unwrap_or_default().as_bytes().to_vec());
    *response.status_mut() = status;
    response.headers_mut().insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn caching_headers(headers: &mut HeaderMap, resource: &Resource, max_age: u64) {
    set(headers, header::CACHE_CONTROL, &format!("max-age={max_age}"));
    set(headers, header::ETAG, &resource.etag());
    set(headers, header::LAST_MODIFIED, &fmt_http_date(resource.last_modified));
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        },
        // Only reachable for ids that cannot appear in a header.
        Err(_) => tracing::debug!(header = %name, "Dropping header with unrepresentable value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn sample() -> Resource {
        Resource {
            id: "123".to_string(),
            bytes: b"data".to_vec(),
            content_type: "image/png".to_string(),
            last_modified: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn test_resource_headers() {
        let response = resource(sample(), 60);
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::ETAG], "\"123\"");
        assert_eq!(headers[header::CACHE_CONTROL], "max-age=60");
        assert_eq!(headers[header::LAST_MODIFIED], "Tue, 14 Nov 2023 22:13:20 GMT");
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(response.body(), b"data");
    }

    #[rstest]
    #[case(header::IF_NONE_MATCH, "\"123\"", true)]
    #[case(header::IF_NONE_MATCH, "\"122\", \"123\"", true)]
    #[case(header::IF_NONE_MATCH, "W/\"123\"", true)]
    #[case(header::IF_NONE_MATCH, "*", true)]
    #[case(header::IF_NONE_MATCH, "\"124\"", false)]
    #[case(header::IF_NONE_MATCH, "123", false)]
    #[case(header::IF_MODIFIED_SINCE, "Tue, 14 Nov 2023 22:13:20 GMT", true)]
    #[case(header::IF_MODIFIED_SINCE, "Wed, 15 Nov 2023 00:00:00 GMT", true)]
    #[case(header::IF_MODIFIED_SINCE, "Mon, 13 Nov 2023 00:00:00 GMT", false)]
    #[case(header::IF_MODIFIED_SINCE, "yesterday", false)]
    fn test_is_fresh(#[case] name: HeaderName, #[case] value: &str, #[case] fresh: bool) {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        assert_eq!(sample().is_fresh(&headers), fresh);
        assert!(!sample().is_fresh(&HeaderMap::new()));
    }

    #[test]
    fn test_not_modified_has_no_body() {
        let response = not_modified(&sample(), 60);
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(response.headers()[header::ETAG], "\"123\"");
        assert!(response.body().is_empty());
    }

    #[test]
    fn test_error_body_has_no_details() {
        let response = error(&ErrorKind::InvalidRequest("/secret/path".to_string()));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.body(), b"Bad Request");
    }

    #[test]
    fn test_system_time_clamps_pre_epoch() {
        assert_eq!(system_time(OffsetDateTime::UNIX_EPOCH - time::Duration::days(1)), UNIX_EPOCH);
    }
}
