//! HTTP surface: one endpoint, any path.
//!
//! The handler dispatches the request, runs the [`Converter`] and turns the
//! terminal outcome into a response. Status mapping:
//!
//! | Outcome | Status | Body |
//! |---------|--------|------|
//! | validation error | 400 | plain-text reason |
//! | valid headers, body over `max_body_bytes` | 413 | plain-text reason |
//! | pipeline failure | 500 | failing stage plus captured tool output |
//! | success | 200 | converted bytes, `Content-Type` = client's `Accept` |

use crate::config::ServiceConfig;
use crate::convert::Converter;
use crate::error::{DocRelayError, ErrorKind, PipelineFailure};
use crate::output::ConversionOutput;
use crate::pipeline::PipelineState;
use crate::request::dispatch;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub converter: Arc<Converter>,
}

impl AppState {
    pub fn new(converter: Converter) -> Self {
        Self {
            converter: Arc::new(converter),
        }
    }
}

/// Build the service router. Every method and path reaches the handler, which
/// rejects anything but POST itself so the client gets a 400 with a reason.
///
/// No body-limit layer: the handler enforces `max_body_bytes` itself, after
/// the method and headers are validated.
pub fn router(state: AppState) -> Router {
    Router::new()
        .fallback(handle)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let config = state.converter.config();
    let pending = match dispatch(&method, &headers, config) {
        Ok(pending) => pending,
        Err(e) => {
            warn!("Rejected {} request: {}", method, e);
            return e.into_response();
        }
    };
    debug!(
        "Request {} accepted ({:?})",
        pending.id(),
        pending.plan().strategy
    );

    // A read error here is either the limit or a dropped connection, and a
    // dropped connection never sees the response.
    let body = match axum::body::to_bytes(body, config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let rejection = DocRelayError::BodyTooLarge {
                limit: config.max_body_bytes,
            };
            warn!("Request {}: {} ({})", pending.id(), rejection, e);
            return rejection.into_response();
        }
    };
    let job = pending.with_body(body);

    let id = job.id;
    let response = match state.converter.convert(job).await {
        Ok(output) => output.into_response(),
        Err(failure) => failure.into_response(),
    };
    debug!("Request {}: {}", id, PipelineState::ResponseSent);
    response
}

// ── Response emitter ─────────────────────────────────────────────────────

impl IntoResponse for DocRelayError {
    fn into_response(self) -> Response {
        let status = match (&self, self.kind()) {
            (DocRelayError::BodyTooLarge { .. }, _) => StatusCode::PAYLOAD_TOO_LARGE,
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

impl IntoResponse for PipelineFailure {
    fn into_response(self) -> Response {
        // Never partial output: the body is the diagnostic text alone.
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

impl IntoResponse for ConversionOutput {
    fn into_response(self) -> Response {
        let content_type = HeaderValue::from_str(&self.media_type).unwrap_or_else(|_| {
            HeaderValue::from_static("application/octet-stream")
        });
        (StatusCode::OK, [(header::CONTENT_TYPE, content_type)], self.bytes).into_response()
    }
}

// ── Server ───────────────────────────────────────────────────────────────

/// Bind the listener and serve until Ctrl-C or SIGTERM.
///
/// In-flight conversions finish, and clean up their workspaces, before this
/// returns.
pub async fn serve(config: ServiceConfig) -> Result<(), DocRelayError> {
    let addr = config.bind_addr();
    info!(
        "Using pandoc at '{}' and pdflatex at '{}'",
        config.pandoc_path.display(),
        config.pdflatex_path.display()
    );
    info!(
        "Workspaces under {}, up to {} concurrent tool processes",
        config.workspace_root.display(),
        config.max_concurrent_tools
    );

    let converter = Converter::new(config)?;
    let app = router(AppState::new(converter));

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| DocRelayError::io("bind", addr.clone(), e))?;
    info!("docrelay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| DocRelayError::Internal(format!("server error: {e}")))?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ConversionStats;
    use std::time::Duration;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn validation_errors_are_400() {
        let response = DocRelayError::MissingHeader { name: "accept" }.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
        assert_eq!(body_text(response).await, "Missing required header 'accept'");
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let response = DocRelayError::BodyTooLarge { limit: 4 }.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn pipeline_failures_are_500_with_diagnostics() {
        let failure = PipelineFailure {
            state: PipelineState::AssetsFetched,
            error: DocRelayError::ToolFailed {
                tool: "pandoc",
                code: "1".into(),
                diagnostics: "Unknown extension: foo".into(),
            },
        };
        let response = failure.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(body.contains("assets fetched"), "got: {body}");
        assert!(body.contains("Unknown extension: foo"), "got: {body}");
    }

    #[tokio::test]
    async fn timeouts_are_500() {
        let failure = PipelineFailure {
            state: PipelineState::AssetsFetched,
            error: DocRelayError::ToolTimedOut {
                tool: "pdflatex",
                after: Duration::from_secs(1),
            },
        };
        assert_eq!(
            failure.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn output_uses_requested_media_type() {
        let output = ConversionOutput {
            bytes: b"%PDF-1.5".to_vec(),
            media_type: "application/pdf".into(),
            stats: ConversionStats::default(),
        };
        let response = output.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(body_text(response).await, "%PDF-1.5");
    }

    #[tokio::test]
    async fn unrepresentable_media_type_falls_back() {
        let output = ConversionOutput {
            bytes: vec![1, 2, 3],
            media_type: "text/html\u{7f}".into(),
            stats: ConversionStats::default(),
        };
        let response = output.into_response();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
    }
}
