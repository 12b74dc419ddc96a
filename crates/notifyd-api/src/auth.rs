//! Ed25519 JWT bearer authentication (C18).
//!
//! Verifies `Authorization: Bearer <jwt>` against a configured Ed25519
//! public key and extracts the `biz_id` claim so handlers can populate
//! `tenant_id` on notifications that omit it.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Claims {
    pub biz_id: u64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct AuthState {
    decoding_key: Arc<DecodingKey>,
}

impl AuthState {
    /// `public_key_pem` is an Ed25519 public key in PEM form.
    pub fn from_ed25519_pem(public_key_pem: &[u8]) -> Result<Self, jsonwebtoken::errors::Error> {
        Ok(Self { decoding_key: Arc::new(DecodingKey::from_ed_pem(public_key_pem)?) })
    }
}

/// Request extension carrying the authenticated tenant id, set once the
/// token has verified.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedTenant(pub u64);

pub async fn jwt_auth(State(state): State<AuthState>, mut request: Request, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    let mut validation = Validation::new(Algorithm::EdDSA);
    validation.validate_exp = true;

    match decode::<Claims>(token, &state.decoding_key, &validation) {
        Ok(data) => {
            request.extensions_mut().insert(AuthenticatedTenant(data.claims.biz_id));
            next.run(request).await
        }
        Err(err) => unauthorized(&err.to_string()),
    }
}

fn unauthorized(message: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(serde_json::json!({ "error": { "kind": "unauthorized", "message": message } }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_round_trip_through_json() {
        let claims = Claims { biz_id: 42, exp: 9_999_999_999 };
        let encoded = serde_json::to_string(&claims).unwrap();
        let decoded: Claims = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.biz_id, 42);
    }
}
