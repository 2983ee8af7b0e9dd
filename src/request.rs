//! Request dispatch: turn an inbound HTTP request into a [`ConversionJob`].
//!
//! Dispatch only parses and validates. It touches neither the filesystem nor
//! the network, so every error it returns is a validation error and maps to
//! `400 Bad Request` with no workspace ever allocated.
//!
//! Validation looks at the method and headers alone and yields a
//! [`PendingJob`]; the body is attached afterwards with
//! [`PendingJob::with_body`]. A bad request is therefore rejected before a
//! single body byte is read, however large the body is.

use crate::config::ServiceConfig;
use crate::error::DocRelayError;
use crate::pipeline::plan::ConversionPlan;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use uuid::Uuid;

/// Optional JSON array of `{"url": ..., "name": ...}` objects.
pub const ASSET_COLLECTION_HEADER: &str = "asset-collection";

/// Optional JSON array of filter identifiers.
pub const FILTERS_HEADER: &str = "filters";

/// One remote resource to place in the workspace asset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub url: String,
    /// File name inside the asset directory.
    #[serde(rename = "name")]
    pub destination_name: String,
}

/// A parsed, immutable conversion request.
///
/// Media types live on the job's [`ConversionPlan`].
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub body: Bytes,
    pub assets: Vec<AssetSpec>,
    pub filters: Vec<String>,
}

/// A validated request ready for the pipeline.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    /// Unique per request; names the workspace and tags every log line.
    pub id: Uuid,
    pub request: ConversionRequest,
    pub plan: ConversionPlan,
}

/// A request whose method and headers passed validation, awaiting its body.
#[derive(Debug, Clone)]
pub struct PendingJob {
    id: Uuid,
    assets: Vec<AssetSpec>,
    filters: Vec<String>,
    plan: ConversionPlan,
}

impl PendingJob {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plan(&self) -> &ConversionPlan {
        &self.plan
    }

    pub fn with_body(self, body: Bytes) -> ConversionJob {
        ConversionJob {
            id: self.id,
            request: ConversionRequest {
                body,
                assets: self.assets,
                filters: self.filters,
            },
            plan: self.plan,
        }
    }
}

/// Validate the method and headers of an inbound request.
pub fn dispatch(
    method: &Method,
    headers: &HeaderMap,
    config: &ServiceConfig,
) -> Result<PendingJob, DocRelayError> {
    if *method != Method::POST {
        return Err(DocRelayError::MethodNotAllowed {
            method: method.to_string(),
        });
    }
    let content_type = required_header(headers, header::CONTENT_TYPE, "content-type")?;
    let accept = required_header(headers, header::ACCEPT, "accept")?;

    let assets = match optional_header(headers, ASSET_COLLECTION_HEADER)? {
        Some(raw) => parse_asset_manifest(raw)?,
        None => Vec::new(),
    };
    let filters = match optional_header(headers, FILTERS_HEADER)? {
        Some(raw) => parse_filter_list(raw)?,
        None => Vec::new(),
    };

    let plan = ConversionPlan::resolve(content_type, accept, &filters, config)?;

    Ok(PendingJob {
        id: Uuid::new_v4(),
        assets,
        filters,
        plan,
    })
}

/// Parse the `asset-collection` header.
///
/// Malformed JSON is an error, never an empty manifest. Names must be plain
/// file names and unique, since each one becomes a path in the asset
/// directory.
pub fn parse_asset_manifest(raw: &str) -> Result<Vec<AssetSpec>, DocRelayError> {
    let assets: Vec<AssetSpec> =
        serde_json::from_str(raw).map_err(|e| DocRelayError::InvalidAssetManifest {
            reason: e.to_string(),
        })?;

    let mut seen = HashSet::new();
    for asset in &assets {
        if !is_plain_file_name(&asset.destination_name) {
            return Err(DocRelayError::InvalidAssetName {
                name: asset.destination_name.clone(),
            });
        }
        if !seen.insert(asset.destination_name.as_str()) {
            return Err(DocRelayError::DuplicateAssetName {
                name: asset.destination_name.clone(),
            });
        }
    }
    Ok(assets)
}

/// Parse the `filters` header. Allowlisting happens during planning.
pub fn parse_filter_list(raw: &str) -> Result<Vec<String>, DocRelayError> {
    serde_json::from_str(raw).map_err(|e| DocRelayError::InvalidFilterList {
        reason: e.to_string(),
    })
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().is_some_and(|f| f == name)
}

fn required_header<'a>(
    headers: &'a HeaderMap,
    key: header::HeaderName,
    name: &'static str,
) -> Result<&'a str, DocRelayError> {
    let value = headers
        .get(key)
        .ok_or(DocRelayError::MissingHeader { name })?
        .to_str()
        .map_err(|_| DocRelayError::InvalidHeader { name })?
        .trim();
    if value.is_empty() {
        return Err(DocRelayError::MissingHeader { name });
    }
    Ok(value)
}

fn optional_header<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, DocRelayError> {
    headers
        .get(name)
        .map(|v| v.to_str().map_err(|_| DocRelayError::InvalidHeader { name }))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::plan::Strategy;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    fn config() -> ServiceConfig {
        ServiceConfig::default()
    }

    #[test]
    fn parses_minimal_request() {
        let h = headers(&[("content-type", "text/markdown"), ("accept", "text/html")]);
        let job = dispatch(&Method::POST, &h, &config())
            .unwrap()
            .with_body(Bytes::from_static(b"# Title"));
        assert_eq!(job.request.body, Bytes::from_static(b"# Title"));
        assert_eq!(job.plan.input.token, "markdown");
        assert_eq!(job.plan.output_media_type, "text/html");
        assert!(job.request.assets.is_empty());
        assert!(job.request.filters.is_empty());
        assert_eq!(job.plan.strategy, Strategy::Converter);
    }

    #[test]
    fn each_job_gets_a_fresh_id() {
        let h = headers(&[("content-type", "text/markdown"), ("accept", "text/html")]);
        let a = dispatch(&Method::POST, &h, &config()).unwrap();
        let b = dispatch(&Method::POST, &h, &config()).unwrap();
        assert_ne!(a.id(), b.id());
        let id = a.id();
        assert_eq!(a.with_body(Bytes::new()).id, id);
    }

    #[test]
    fn rejects_non_post() {
        let h = headers(&[("content-type", "text/markdown"), ("accept", "text/html")]);
        for method in [Method::GET, Method::PUT, Method::DELETE] {
            let err = dispatch(&method, &h, &config()).unwrap_err();
            assert!(matches!(err, DocRelayError::MethodNotAllowed { .. }));
        }
    }

    #[test]
    fn rejects_missing_headers() {
        let err = dispatch(
            &Method::POST,
            &headers(&[("accept", "text/html")]),
            &config(),
        )
        .unwrap_err();
        assert!(matches!(err, DocRelayError::MissingHeader { name: "content-type" }));

        let err = dispatch(
            &Method::POST,
            &headers(&[("content-type", "text/markdown")]),
            &config(),
        )
        .unwrap_err();
        assert!(matches!(err, DocRelayError::MissingHeader { name: "accept" }));

        let err = dispatch(
            &Method::POST,
            &headers(&[("content-type", " "), ("accept", "text/html")]),
            &config(),
        )
        .unwrap_err();
        assert!(matches!(err, DocRelayError::MissingHeader { name: "content-type" }));
    }

    #[test]
    fn parses_asset_manifest_and_filters() {
        let h = headers(&[
            ("content-type", "text/markdown"),
            ("accept", "application/pdf"),
            (
                "asset-collection",
                r#"[{"url":"https://example.com/a.png","name":"a.png"},{"url":"http://example.com/b.jpg","name":"b.jpg"}]"#,
            ),
            ("filters", r#"["table"]"#),
        ]);
        let job = dispatch(&Method::POST, &h, &config())
            .unwrap()
            .with_body(Bytes::new());
        assert_eq!(
            job.request.assets,
            vec![
                AssetSpec {
                    url: "https://example.com/a.png".into(),
                    destination_name: "a.png".into()
                },
                AssetSpec {
                    url: "http://example.com/b.jpg".into(),
                    destination_name: "b.jpg".into()
                },
            ]
        );
        assert_eq!(job.request.filters, vec!["table".to_string()]);
        assert_eq!(job.plan.filters.len(), 1);
    }

    #[test]
    fn malformed_manifest_is_a_validation_error() {
        for raw in ["not json", "{}", r#"[{"url":"x"}]"#, "null"] {
            let err = parse_asset_manifest(raw).unwrap_err();
            assert!(
                matches!(err, DocRelayError::InvalidAssetManifest { .. }),
                "{raw:?} should be rejected"
            );
        }
        assert!(parse_asset_manifest("[]").unwrap().is_empty());
    }

    #[test]
    fn asset_names_must_stay_inside_asset_dir() {
        for name in ["../escape.png", "/etc/passwd", "a/b.png", "..", ".", "", "a\\b"] {
            let raw = serde_json::json!([{ "url": "http://x/y", "name": name }]).to_string();
            let err = parse_asset_manifest(&raw).unwrap_err();
            assert!(
                matches!(err, DocRelayError::InvalidAssetName { .. }),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn duplicate_asset_names_are_rejected() {
        let raw = r#"[{"url":"http://x/1","name":"a.png"},{"url":"http://x/2","name":"a.png"}]"#;
        let err = parse_asset_manifest(raw).unwrap_err();
        assert!(matches!(err, DocRelayError::DuplicateAssetName { .. }));
    }

    #[test]
    fn malformed_filter_list_is_rejected() {
        assert!(matches!(
            parse_filter_list(r#""table""#).unwrap_err(),
            DocRelayError::InvalidFilterList { .. }
        ));
        assert!(matches!(
            parse_filter_list("[1, 2]").unwrap_err(),
            DocRelayError::InvalidFilterList { .. }
        ));
    }

    #[test]
    fn unknown_filter_is_rejected_at_dispatch() {
        let h = headers(&[
            ("content-type", "text/markdown"),
            ("accept", "text/html"),
            ("filters", r#"["../../usr/bin/env"]"#),
        ]);
        let err = dispatch(&Method::POST, &h, &config()).unwrap_err();
        assert!(matches!(err, DocRelayError::FilterNotAllowed { .. }));
    }
}
