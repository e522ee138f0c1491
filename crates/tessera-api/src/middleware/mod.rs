//! HTTP middleware applied to every route
//!
//! The authentication gates live in [`crate::auth::middleware`].
//!
//! Author: hephaex@gmail.com

pub mod security_headers;

pub use security_headers::security_headers_middleware;
