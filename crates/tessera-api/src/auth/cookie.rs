//! Token cookies

use axum::http::{header, HeaderMap, HeaderValue};
use tessera_core::CookieConfig;

use crate::error::AppError;

pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";
pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Build a `Set-Cookie` value
///
/// Token cookies are always `HttpOnly`, `SameSite=Strict` and scoped to the
/// configured domain at `Path=/`.
pub fn build_cookie(
    name: &str,
    value: &str,
    max_age_secs: u64,
    config: &CookieConfig,
) -> Result<HeaderValue, AppError> {
    let mut cookie = format!(
        "{name}={value}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Strict"
    );
    if !config.domain.is_empty() {
        cookie.push_str("; Domain=");
        cookie.push_str(&config.domain);
    }
    if config.secure {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("invalid cookie header: {e}")))
}

/// `Set-Cookie` value that expires `name` immediately
pub fn clear_cookie(name: &str, config: &CookieConfig) -> Result<HeaderValue, AppError> {
    build_cookie(name, "", 0, config)
}

/// Read a cookie from the request's `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CookieConfig {
        CookieConfig {
            domain: "localhost".to_string(),
            secure: false,
        }
    }

    #[test]
    fn test_build_cookie_attributes() {
        let cookie = build_cookie(ACCESS_TOKEN_COOKIE, "abc.def.ghi", 3600, &config()).unwrap();
        let cookie = cookie.to_str().unwrap();

        assert!(cookie.starts_with("accessToken=abc.def.ghi;"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Domain=localhost"));
        assert!(cookie.contains("Path=/"));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn test_secure_flag() {
        let config = CookieConfig {
            secure: true,
            ..config()
        };
        let cookie = build_cookie(REFRESH_TOKEN_COOKIE, "x", 1, &config).unwrap();
        assert!(cookie.to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn test_clear_cookie() {
        let cookie = clear_cookie(REFRESH_TOKEN_COOKIE, &config()).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("refreshToken=;"));
        assert!(cookie.contains("Max-Age=0"));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; accessToken=a.b.c; refreshToken=d.e.f"),
        );

        assert_eq!(read_cookie(&headers, ACCESS_TOKEN_COOKIE).as_deref(), Some("a.b.c"));
        assert_eq!(read_cookie(&headers, REFRESH_TOKEN_COOKIE).as_deref(), Some("d.e.f"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_read_cookie_ignores_empty_value() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("accessToken="));
        assert_eq!(read_cookie(&headers, ACCESS_TOKEN_COOKIE), None);
    }
}
