use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::response::Response;

use crate::error::AppError;
use crate::providers::{filter_request_headers, filter_response_headers};
use crate::AppState;

/// Wall-clock limit for the upstream fetch.
const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// /proxy/<absolute-url>
///
/// Unauthenticated pass-through: method, filtered headers, and body go to
/// the given URL verbatim. Timeouts answer 504, other I/O failures 500.
pub async fn passthrough(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_default()
        .strip_prefix("/proxy/")
        .unwrap_or_default()
        .to_string();

    if !target.starts_with("http") {
        return Err(AppError::BadRequest("URL must begin with http".to_string()));
    }

    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read request body: {e}")))?;

    let headers = filter_request_headers(&parts.headers);
    let mut builder = state
        .http
        .inner()
        .request(parts.method.clone(), &target)
        .headers(headers);
    if !body_bytes.is_empty() {
        builder = builder.body(body_bytes);
    }

    let upstream = match tokio::time::timeout(PROXY_TIMEOUT, builder.send()).await {
        Err(_) => return Err(AppError::UpstreamTimeout),
        Ok(Err(e)) => return Err(AppError::Upstream(e.to_string())),
        Ok(Ok(response)) => response,
    };

    let status = upstream.status();
    let mut headers = filter_response_headers(upstream.headers());
    headers.insert(
        "x-proxy-url",
        HeaderValue::from_str(&target)
            .map_err(|_| AppError::BadRequest("URL contains invalid characters".to_string()))?,
    );

    tracing::debug!(url = %target, status = %status, "Proxied request");

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
