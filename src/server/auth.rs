use axum::{extract::Request, http::header, middleware::Next, response::Response};
use base64::Engine as _;

use crate::error::GatewayError;
use crate::principal::Principal;

/// Axum middleware extracting the request principal.
///
/// The gateway does not verify credentials itself; it builds a [`Principal`]
/// from the `Authorization: Basic` header and lets the driver be the
/// authority when the session is opened. Requests without usable
/// credentials are rejected before any handler runs.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, GatewayError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(header_value) = header_value else {
        return Err(GatewayError::Unauthorized(
            "missing Authorization header".to_string(),
        ));
    };

    // Support: Authorization: Basic <base64(user:pass)>
    if let Some(encoded) = header_value.strip_prefix("Basic ") {
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) {
            if let Ok(credentials) = String::from_utf8(decoded) {
                if let Some((username, password)) = credentials.split_once(':') {
                    req.extensions_mut()
                        .insert(Principal::new(username, password));
                    return Ok(next.run(req).await);
                }
            }
        }
        return Err(GatewayError::Unauthorized(
            "malformed Basic credentials".to_string(),
        ));
    }

    Err(GatewayError::Unauthorized(
        "unsupported authorization scheme".to_string(),
    ))
}
