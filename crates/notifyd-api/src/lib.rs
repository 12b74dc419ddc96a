//! JSON API surface (C17, C18): JWT bearer authentication and the four
//! notification send routes, plus health probes.

mod auth;
mod dto;
mod error;
mod routes;

pub use auth::{jwt_auth, AuthState, AuthenticatedTenant, Claims};
pub use routes::ApiState;

use axum::middleware;
use axum::Router;

/// Builds the full API router: health probes are unauthenticated, the
/// send routes sit behind the JWT bearer middleware.
pub fn build_router(api_state: ApiState, auth_state: AuthState) -> Router {
    let protected = routes::send_routes(api_state).layer(middleware::from_fn_with_state(auth_state, jwt_auth));

    Router::new().merge(routes::health_routes()).merge(protected)
}
