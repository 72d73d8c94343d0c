use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::{bearer_token, classify_bearer, native_key_provider, RequestAuth};
use crate::error::AppError;
use crate::meter::MeterEvent;
use crate::providers::types::{ProxySpec, Transformed, TransformContext};
use crate::providers::{filter_response_headers, ProviderAdapter};
use crate::sse::{MeterCallback, SseSplitter};
use crate::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Fallback route: `/{provider}/{*path}`.
///
/// The pipeline: resolve the adapter, classify the bearer credential, admit
/// against the budget, transform, forward, stream back, and hand the usage
/// to the metering loop. Metering is the terminal side effect; the client
/// sees upstream bytes as they arrive.
pub async fn dispatch(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();

    let full_path = parts.uri.path().trim_start_matches('/');
    let (provider_id, suffix) = full_path.split_once('/').unwrap_or((full_path, ""));

    let adapter = state
        .registry
        .get(provider_id)
        .ok_or_else(|| AppError::NotFound(format!("Unknown provider: {provider_id}")))?;

    let token = bearer_token(&parts.headers)?;
    let auth = classify_bearer(&token, &state.tokens)?;

    tracing::info!(
        provider = %provider_id,
        path = %suffix,
        native = auth.is_native(),
        native_upstream = native_key_provider(&token).unwrap_or(""),
        "Gateway request"
    );

    // Budget admission, identity tokens only. The snapshot is taken at admit
    // time; concurrent in-flight requests may overshoot.
    if let Some(email) = auth.email() {
        let rule = state.policy.lookup(email);
        let spent = state.ledger.sum(email, rule.days)?;
        if spent >= rule.limit_usd {
            tracing::warn!(email = %email, spent_usd = spent, limit_usd = rule.limit_usd, "Budget exceeded");
            return Err(AppError::BudgetExceeded(format!(
                "Usage ${spent} / ${} in {} days",
                rule.limit_usd, rule.days
            )));
        }
    }

    let path = match parts.uri.query() {
        Some(query) => format!("{suffix}?{query}"),
        None => suffix.to_string(),
    };
    let body_bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read request body: {e}")))?;

    let ctx = TransformContext {
        path,
        method: parts.method.clone(),
        headers: parts.headers.clone(),
        body: body_bytes,
        auth: auth.clone(),
    };

    match adapter.transform(&ctx).await? {
        Transformed::Direct { body, model, usage } => {
            if let Some(email) = auth.email() {
                let _ = state.meter_tx.send(MeterEvent {
                    email: email.to_string(),
                    provider: adapter.id().to_string(),
                    model,
                    usage,
                    path: ctx.path.clone(),
                    request_body: None,
                });
            }
            Ok(Json(body).into_response())
        }
        Transformed::Proxy(spec) => forward(&state, adapter, &auth, &ctx, spec).await,
    }
}

/// Forward the rewritten request and classify the response: JSON bodies are
/// buffered and parsed for usage, SSE bodies get the splitter interposed,
/// anything else passes through unmetered.
async fn forward(
    state: &AppState,
    adapter: Arc<dyn ProviderAdapter>,
    auth: &RequestAuth,
    ctx: &TransformContext,
    spec: ProxySpec,
) -> Result<Response, AppError> {
    let mut builder = state
        .http
        .inner()
        .request(ctx.method.clone(), &spec.url)
        .headers(spec.headers);
    if let Some(body) = spec.body {
        builder = builder.body(body);
    }

    let upstream = builder
        .send()
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let status = upstream.status();
    let headers = filter_response_headers(upstream.headers());
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let meter_email = auth.email().map(str::to_string);

    let body = if content_type.contains("application/json") {
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;
        if let Some(email) = meter_email {
            if let Ok(event) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                let frame = adapter.parse(&event);
                let _ = state.meter_tx.send(MeterEvent {
                    email,
                    provider: adapter.id().to_string(),
                    model: frame.model,
                    usage: frame.usage,
                    path: ctx.path.clone(),
                    request_body: serde_json::from_slice(&ctx.body).ok(),
                });
            }
        }
        Body::from(bytes)
    } else if content_type.contains("text/event-stream") {
        let stream = upstream.bytes_stream();
        match meter_email {
            Some(email) => {
                let tx = state.meter_tx.clone();
                let provider = adapter.id().to_string();
                let path = ctx.path.clone();
                let request_body = serde_json::from_slice(&ctx.body).ok();
                let on_end: MeterCallback = Box::new(move |model, usage| {
                    let _ = tx.send(MeterEvent {
                        email,
                        provider,
                        model,
                        usage,
                        path,
                        request_body,
                    });
                });
                Body::from_stream(SseSplitter::new(stream, adapter, on_end))
            }
            None => Body::from_stream(stream),
        }
    } else {
        // Binary and other content types pass through without metering.
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
