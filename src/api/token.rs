use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub credential: Option<String>,
}

/// GET /token?credential=…
///
/// Verifies a third-party OIDC credential and mints an identity token bound
/// to its verified email.
pub async fn mint_from_credential(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    let credential = query.credential.ok_or_else(|| {
        AppError::BadRequest("credential query parameter required".to_string())
    })?;

    let profile = state.oidc.verify(&credential).await?;
    let token = state.tokens.mint(&profile.email)?;

    tracing::info!(email = %profile.email, "Minted identity token");

    Ok(Json(json!({
        "token": token,
        "email": profile.email,
        "name": profile.name,
        "picture": profile.picture,
    })))
}
