use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    http::StatusCode,
};
use innkeep_core::{Requester, Role};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn requester(&self) -> Option<Requester> {
        let user_id = Uuid::parse_str(&self.sub).ok()?;
        Some(Requester {
            user_id,
            role: Role::from_claim(&self.role),
        })
    }
}

/// Validates the bearer token and injects the caller as a `Requester` extension.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(state.auth.secret.as_bytes()),
        &Validation::default(),
    ).map_err(|_| StatusCode::UNAUTHORIZED)?;

    let requester = token_data.claims.requester().ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(requester);

    Ok(next.run(req).await)
}

/// Must run after `auth_middleware`.
pub async fn operator_middleware(req: Request, next: Next) -> Result<Response, StatusCode> {
    match req.extensions().get::<Requester>() {
        Some(requester) if requester.role == Role::Operator => Ok(next.run(req).await),
        Some(_) => Err(StatusCode::FORBIDDEN),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
