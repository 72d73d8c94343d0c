use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::auth::require_identity;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AdminQuery {
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetCostRequest {
    pub email: String,
    pub date: String,
    pub cost: f64,
}

/// /admin/{usage|token|cost}
///
/// Identity-token-only; the caller's email must be in the admin set.
pub async fn dispatch(
    State(state): State<AppState>,
    Path(action): Path<String>,
    Query(query): Query<AdminQuery>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let caller = require_identity(&headers, &state.tokens)?;
    if !state.tokens.is_admin(&caller) {
        return Err(AppError::Forbidden(format!("{caller} is not an admin")));
    }

    match action.as_str() {
        "usage" if method == Method::GET => {
            let rows = state.ledger.all_usage()?;
            Ok(Json(json!({ "data": rows })).into_response())
        }
        "token" if method == Method::GET => {
            let target = query.email.ok_or_else(|| {
                AppError::BadRequest("email query parameter required".to_string())
            })?;
            let token = state.tokens.mint(&target)?;
            tracing::info!(admin = %caller, email = %target, "Admin minted token");
            Ok(Json(json!({ "token": token, "email": target })).into_response())
        }
        "cost" if method == Method::POST => {
            let request: SetCostRequest = serde_json::from_slice(&body)?;
            state
                .ledger
                .set_cost(&request.email, &request.date, request.cost)?;
            tracing::info!(
                admin = %caller,
                email = %request.email,
                date = %request.date,
                cost_usd = request.cost,
                "Admin set cost"
            );
            Ok(Json(json!({
                "email": request.email,
                "date": request.date,
                "cost": request.cost,
            }))
            .into_response())
        }
        "cost" => Err(AppError::MethodNotAllowed(
            "POST required for /admin/cost".to_string(),
        )),
        _ => Err(AppError::NotFound(format!("Unknown admin action: {action}"))),
    }
}
