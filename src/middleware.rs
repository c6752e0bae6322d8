//! Access gate: API key check and CORS headers for the `/api` routes.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::{errors::AppError, state::AuthSettings};

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Reject requests whose `X-API-Key` header does not match the configured key.
///
/// An empty configured key rejects everything.
pub async fn require_api_key(
    State(auth): State<Arc<AuthSettings>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = req
        .headers()
        .get(&API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if auth.api_key.is_empty() || presented != auth.api_key {
        return Err(AppError::unauthorized(
            "Access denied. Invalid or missing API Key.",
        ));
    }
    Ok(next.run(req).await)
}

/// Allow any origin and answer `OPTIONS` directly with an empty 200.
pub async fn cors(req: Request, next: Next) -> Response {
    let mut response = if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::OK;
        response
    } else {
        next.run(req).await
    };
    set_cors_headers(response.headers_mut());
    response
}

fn set_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, X-API-Key"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware, routing::get};
    use tower::util::ServiceExt;

    async fn dummy_handler() -> &'static str {
        "OK"
    }

    fn app(api_key: &str) -> Router {
        let auth = Arc::new(AuthSettings {
            api_key: api_key.into(),
            ui_username: String::new(),
            ui_password_hash: String::new(),
        });
        Router::new()
            .route("/", get(dummy_handler))
            .route_layer(middleware::from_fn_with_state(auth, require_api_key))
            .layer(middleware::from_fn(cors))
    }

    fn request(method: Method, key: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder().method(method).uri("/");
        if let Some(key) = key {
            builder = builder.header("X-API-Key", key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_valid_key_passes() {
        let response = app("k").oneshot(request(Method::GET, Some("k"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_missing_or_wrong_key_is_unauthorized() {
        for key in [None, Some("wrong"), Some("")] {
            let response = app("k").oneshot(request(Method::GET, key)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{key:?}");
        }
    }

    #[tokio::test]
    async fn test_empty_configured_key_rejects_everything() {
        let response = app("").oneshot(request(Method::GET, Some(""))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_options_short_circuits_before_auth() {
        let response = app("k").oneshot(request(Method::OPTIONS, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-headers")
                .unwrap(),
            "Content-Type, X-API-Key"
        );
    }
}
