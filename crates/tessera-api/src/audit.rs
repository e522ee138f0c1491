//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO level with the "audit" target so they
//! can be filtered and routed separately from application logs. Passwords and
//! token strings are never part of an event.
//!
//! ```ignore
//! use tessera_api::audit::{audit_log, AuditEvent};
//!
//! audit_log(&AuditEvent::LoginSuccess {
//!     user_id: user.id,
//!     email: user.email.clone(),
//!     ip_address: Some("192.168.1.1".to_string()),
//!     user_agent: Some("Mozilla/5.0...".to_string()),
//! });
//! ```
//!
//! Author: hephaex@gmail.com

use axum::http::HeaderMap;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tessera_core::Role;
use tracing::{info, warn};

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// Successful user login
    LoginSuccess {
        user_id: i64,
        email: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed login attempt
    LoginFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// User logout
    Logout {
        user_id: i64,
        token_id: i64,
        /// False when the refresh entry was already gone
        revoked: bool,
        ip_address: Option<String>,
    },

    /// Refresh token rotated
    TokenRefresh {
        user_id: i64,
        old_token_id: i64,
        new_token_id: i64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Refresh token consumed by a concurrent rotation
    RefreshReuseRejected {
        user_id: i64,
        token_id: i64,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Successful self-registration
    RegistrationSuccess {
        user_id: i64,
        email: String,
        role: Role,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Failed registration attempt
    RegistrationFailure {
        email: String,
        reason: String,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Account created by an administrator
    UserCreated {
        user_id: i64,
        email: String,
        role: Role,
        tenant_id: Option<i64>,
        created_by: i64,
        ip_address: Option<String>,
    },

    /// Access denied due to insufficient permissions
    AccessDenied {
        user_id: Option<i64>,
        role: Option<Role>,
        resource: String,
        required_roles: Vec<Role>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    },

    /// Invalid, expired or revoked token presented
    InvalidToken {
        ip_address: Option<String>,
        user_agent: Option<String>,
        reason: String,
    },
}

/// Client metadata extracted from request headers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            ip_address: extract_ip_address(headers),
            user_agent: extract_user_agent(headers),
        }
    }
}

/// Log a security audit event with structured fields
///
/// The full event is also serialized to JSON under the `event` field for log
/// aggregators.
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();

    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    match event {
        AuditEvent::LoginSuccess {
            user_id,
            email,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                ip_address = ?ip_address,
                "Login successful"
            );
        }
        AuditEvent::LoginFailure {
            email,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?ip_address,
                "Login failed"
            );
        }
        AuditEvent::Logout {
            user_id,
            token_id,
            revoked,
            ip_address,
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                token_id = %token_id,
                revoked = %revoked,
                ip_address = ?ip_address,
                "User logout"
            );
        }
        AuditEvent::TokenRefresh {
            user_id,
            old_token_id,
            new_token_id,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                old_token_id = %old_token_id,
                new_token_id = %new_token_id,
                ip_address = ?ip_address,
                "Token refresh"
            );
        }
        AuditEvent::RefreshReuseRejected {
            user_id,
            token_id,
            ip_address,
            ..
        } => {
            warn!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                token_id = %token_id,
                ip_address = ?ip_address,
                "Refresh token reuse rejected"
            );
        }
        AuditEvent::RegistrationSuccess {
            user_id,
            email,
            role,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                role = %role,
                ip_address = ?ip_address,
                "Registration successful"
            );
        }
        AuditEvent::RegistrationFailure {
            email,
            reason,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                email = %email,
                reason = %reason,
                ip_address = ?ip_address,
                "Registration failed"
            );
        }
        AuditEvent::UserCreated {
            user_id,
            email,
            role,
            created_by,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = %user_id,
                email = %email,
                role = %role,
                created_by = %created_by,
                ip_address = ?ip_address,
                "User created"
            );
        }
        AuditEvent::AccessDenied {
            user_id,
            role,
            resource,
            ip_address,
            ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                user_id = ?user_id,
                role = ?role,
                resource = %resource,
                ip_address = ?ip_address,
                "Access denied"
            );
        }
        AuditEvent::InvalidToken {
            ip_address, reason, ..
        } => {
            info!(
                target: "audit",
                timestamp = %timestamp,
                event = %event_json,
                ip_address = ?ip_address,
                reason = %reason,
                "Invalid token"
            );
        }
    }
}

/// Extract IP address from request headers
///
/// Checks X-Forwarded-For, then X-Real-IP.
pub fn extract_ip_address(headers: &HeaderMap) -> Option<String> {
    // First entry of X-Forwarded-For is the client
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(first_ip) = xff_str.split(',').next() {
                return Some(first_ip.trim().to_string());
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return Some(ip_str.to_string());
        }
    }

    None
}

/// Extract user agent from request headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|ua| ua.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::LoginSuccess {
            user_id: 12,
            email: "test@example.com".to_string(),
            ip_address: Some("192.168.1.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"login_success\""));
        assert!(json.contains("test@example.com"));
    }

    #[test]
    fn test_access_denied_serializes_roles_lowercase() {
        let event = AuditEvent::AccessDenied {
            user_id: Some(3),
            role: Some(Role::Customer),
            resource: "/users".to_string(),
            required_roles: vec![Role::Admin],
            ip_address: None,
            user_agent: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"role\":\"customer\""));
        assert!(json.contains("\"required_roles\":[\"admin\"]"));
        audit_log(&event);
    }

    #[test]
    fn test_audit_log_all_events() {
        // Just ensures logging never panics
        let events = vec![
            AuditEvent::LoginFailure {
                email: "test@example.com".to_string(),
                reason: "Invalid password".to_string(),
                ip_address: Some("192.168.1.1".to_string()),
                user_agent: Some("Test Agent".to_string()),
            },
            AuditEvent::Logout {
                user_id: 1,
                token_id: 4,
                revoked: false,
                ip_address: None,
            },
            AuditEvent::TokenRefresh {
                user_id: 1,
                old_token_id: 4,
                new_token_id: 5,
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::RefreshReuseRejected {
                user_id: 1,
                token_id: 4,
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::RegistrationSuccess {
                user_id: 1,
                email: "newuser@example.com".to_string(),
                role: Role::Customer,
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::RegistrationFailure {
                email: "dup@example.com".to_string(),
                reason: "Email already exists".to_string(),
                ip_address: None,
                user_agent: None,
            },
            AuditEvent::UserCreated {
                user_id: 2,
                email: "manager@example.com".to_string(),
                role: Role::Manager,
                tenant_id: Some(9),
                created_by: 1,
                ip_address: None,
            },
            AuditEvent::InvalidToken {
                ip_address: None,
                user_agent: None,
                reason: "expired".to_string(),
            },
        ];

        for event in &events {
            audit_log(event);
        }
    }

    #[test]
    fn test_extract_ip_from_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.1, 198.51.100.1".parse().unwrap(),
        );

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_extract_ip_from_x_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "203.0.113.1".parse().unwrap());

        assert_eq!(extract_ip_address(&headers), Some("203.0.113.1".to_string()));
    }

    #[test]
    fn test_client_info_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::USER_AGENT,
            "Mozilla/5.0 (Test)".parse().unwrap(),
        );

        let client = ClientInfo::from_headers(&headers);
        assert_eq!(client.user_agent.as_deref(), Some("Mozilla/5.0 (Test)"));
        assert_eq!(client.ip_address, None);
        assert_eq!(ClientInfo::from_headers(&HeaderMap::new()), ClientInfo::default());
    }
}
