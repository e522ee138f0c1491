//! Security headers middleware
//!
//! Headers configured:
//! - X-Content-Type-Options: nosniff
//! - X-Frame-Options: DENY
//! - Strict-Transport-Security: one year including subdomains
//! - Content-Security-Policy: same origin only
//! - Referrer-Policy: no-referrer
//! - Cache-Control: no-store, since responses may set session cookies
//!
//! Author: hephaex@gmail.com

use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

/// Adds security headers to every response, including error responses
pub async fn security_headers_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));

    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );

    // Swagger UI serves its own assets from the same origin
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; style-src 'self' 'unsafe-inline'"),
    );

    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));

    // Handlers may set their own caching policy
    if !headers.contains_key(header::CACHE_CONTROL) {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{Request, StatusCode},
        middleware,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    async fn test_handler() -> impl IntoResponse {
        (StatusCode::OK, "test response")
    }

    #[tokio::test]
    async fn test_security_headers_added() {
        let app = Router::new()
            .route("/test", get(test_handler))
            .layer(middleware::from_fn(security_headers_middleware));

        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(
            headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(),
            "nosniff"
        );
        assert_eq!(headers.get(header::X_FRAME_OPTIONS).unwrap(), "DENY");
        assert_eq!(
            headers.get(header::STRICT_TRANSPORT_SECURITY).unwrap(),
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(headers.get(header::REFERRER_POLICY).unwrap(), "no-referrer");
        assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    }

    #[tokio::test]
    async fn test_existing_cache_control_is_kept() {
        async fn cached() -> impl IntoResponse {
            ([(header::CACHE_CONTROL, "max-age=60")], "cached")
        }

        let app = Router::new()
            .route("/cached", get(cached))
            .layer(middleware::from_fn(security_headers_middleware));

        let request = Request::builder()
            .uri("/cached")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "max-age=60"
        );
    }

    #[tokio::test]
    async fn test_security_headers_on_error_response() {
        async fn error_handler() -> impl IntoResponse {
            (StatusCode::UNAUTHORIZED, "error")
        }

        let app = Router::new()
            .route("/error", get(error_handler))
            .layer(middleware::from_fn(security_headers_middleware));

        let request = Request::builder()
            .uri("/error")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response
            .headers()
            .get(header::X_CONTENT_TYPE_OPTIONS)
            .is_some());
        assert!(response.headers().get(header::X_FRAME_OPTIONS).is_some());
    }
}
