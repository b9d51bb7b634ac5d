//! services/api/src/web/middleware.rs
//!
//! Resolves the caller for every request.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use ride_share_core::{AuthContext, PortError};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::web::state::AppState;

/// Pulls the session credential from `Authorization: Bearer <token>` or, for
/// browsers, from the `session` cookie.
pub fn credential_from_headers(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies
                .split(';')
                .find_map(|c| c.trim().strip_prefix("session="))
        })
        .filter(|session| !session.is_empty())
        .map(str::to_string)
}

/// Middleware that inserts an `AuthContext` into the request extensions.
///
/// A request without a credential gets an anonymous context and handlers
/// decide whether that is enough. A credential the identity provider rejects
/// is answered with 401 right here.
pub async fn resolve_actor(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let ctx = match credential_from_headers(req.headers()) {
        None => AuthContext::anonymous(),
        Some(credential) => match state.identity.resolve_actor(&credential).await {
            Ok(actor) => {
                debug!(actor_id = %actor.id, "Resolved caller");
                AuthContext::authenticated(actor)
            }
            Err(PortError::Unauthorized | PortError::NotFound(_)) => {
                return Err(ApiError::Unauthorized);
            }
            Err(e) => {
                warn!(error = %e, "Identity lookup failed");
                return Err(e.into());
            }
        },
    };

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use rstest::rstest;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                HeaderName::from_static(*name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[rstest]
    #[case(&[("authorization", "Bearer tok-1")], Some("tok-1"))]
    #[case(&[("cookie", "theme=dark; session=abc123")], Some("abc123"))]
    #[case(&[("authorization", "Bearer tok-2"), ("cookie", "session=abc")], Some("tok-2"))]
    #[case(&[("authorization", "Basic dXNlcg==")], None)]
    #[case(&[("cookie", "session=")], None)]
    #[case(&[("accept", "application/json")], None)]
    fn credentials_are_read_from_bearer_then_cookie(
        #[case] pairs: &[(&'static str, &str)],
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(credential_from_headers(&headers(pairs)).as_deref(), expected);
    }
}
