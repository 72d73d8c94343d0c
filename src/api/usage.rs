use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::require_identity;
use crate::error::AppError;
use crate::AppState;

/// GET /usage
///
/// Spend of the bearer identity over its policy window, with the applicable
/// limit.
pub async fn self_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let email = require_identity(&headers, &state.tokens)?;
    let rule = state.policy.lookup(&email);
    let summary = state.ledger.usage(&email, rule.days)?;

    Ok(Json(json!({
        "email": summary.email,
        "days": summary.days,
        "cost": summary.cost,
        "usage": summary.usage,
        "limit": rule.limit_usd,
    })))
}
