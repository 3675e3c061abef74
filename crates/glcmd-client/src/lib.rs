//! Upstream LibreLinkUp client.
//!
//! The client itself is stateless; the daemon owns the [`AuthSession`] and
//! decides when to refresh it. Credentials and tokens never appear in logs.

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

pub mod adapter;
pub mod models;

pub use adapter::{decode_connection, expected_duration_days, IngestRecord};
pub use models::ConnectionPayload;

use models::{ConnectionsResponse, GraphResponse, LoginResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.libreview.io";

// The upstream rejects requests that do not identify as an official app.
const PRODUCT_HEADER: &str = "llu.android";
const VERSION_HEADER: &str = "4.12.0";

#[derive(Debug, Error)]
pub enum ClientError {
    /// Credentials rejected, or the token is malformed/expired.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The upstream answered with an unexpected shape.
    #[error("unexpected upstream response: {0}")]
    Protocol(String),
    /// Network or transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// AuthSession
// ---------------------------------------------------------------------------

/// Bearer token plus the identifiers resolved at login time.
///
/// The token is opaque to us apart from its expiry; the shape check exists
/// only to fail fast on obviously broken responses.
#[derive(Clone)]
pub struct AuthSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub duration_secs: i64,
    pub user_id: String,
    pub patient_id: String,
    /// Lowercase hex SHA-256 of the user id; sent as the `account-id` header.
    pub account_id: String,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .field("duration_secs", &self.duration_secs)
            .field("user_id", &"<redacted>")
            .field("patient_id", &"<redacted>")
            .finish()
    }
}

impl AuthSession {
    /// True when the token is expired or expires within `safety_window`.
    pub fn needs_refresh(&self, safety_window: std::time::Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(safety_window).unwrap_or(chrono::Duration::zero());
        now + window >= self.expires_at
    }

    /// Check the token shape and expiry. A JWT that does not split into
    /// exactly three dot-separated parts, or whose expiry is not in the
    /// future, is an authentication error.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), ClientError> {
        if self.token.split('.').count() != 3 {
            return Err(ClientError::Auth(
                "token is not a three-part JWT".to_string(),
            ));
        }
        if now >= self.expires_at {
            return Err(ClientError::Auth("token is expired".to_string()));
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256, as the upstream expects in the account-id header.
pub fn account_id_for(user_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// LinkUpClient
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LinkUpClient {
    http: reqwest::Client,
    base_url: String,
}

impl LinkUpClient {
    pub fn new() -> Self {
        Self::new_with_base_url(DEFAULT_BASE_URL.to_string())
    }

    pub fn new_with_base_url(base_url: String) -> Self {
        LinkUpClient {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Log in and resolve the patient id.
    ///
    /// Performs the credential exchange, derives the `account-id` header from
    /// the returned user id, then resolves the patient through the
    /// connections endpoint.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, ClientError> {
        let resp = self
            .http
            .post(self.url("/llu/auth/login"))
            .header("product", PRODUCT_HEADER)
            .header("version", VERSION_HEADER)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ClientError::Auth(format!(
                "login rejected with http status {}",
                status.as_u16()
            )));
        }

        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("login response decode failed: {e}")))?;

        if body.status != 0 {
            return Err(ClientError::Auth(format!(
                "login rejected with status {}",
                body.status
            )));
        }

        let data = body
            .data
            .ok_or_else(|| ClientError::Protocol("login response carried no data".to_string()))?;
        let user = data
            .user
            .ok_or_else(|| ClientError::Protocol("login response carried no user".to_string()))?;
        let ticket = data.auth_ticket.ok_or_else(|| {
            ClientError::Protocol("login response carried no auth ticket".to_string())
        })?;

        if ticket.token.split('.').count() != 3 {
            return Err(ClientError::Auth(
                "login returned a token that is not a three-part JWT".to_string(),
            ));
        }

        let expires_at = Utc
            .timestamp_opt(ticket.expires, 0)
            .single()
            .ok_or_else(|| {
                ClientError::Protocol(format!("invalid token expiry {}", ticket.expires))
            })?;

        let account_id = account_id_for(&user.id);
        let patient_id = self
            .resolve_patient_id(&ticket.token, &account_id)
            .await?;

        debug!(expires_at = %expires_at, "login complete");

        Ok(AuthSession {
            token: ticket.token,
            expires_at,
            duration_secs: ticket.duration,
            user_id: user.id,
            patient_id,
            account_id,
        })
    }

    async fn resolve_patient_id(
        &self,
        token: &str,
        account_id: &str,
    ) -> Result<String, ClientError> {
        let body: ConnectionsResponse = self
            .http
            .get(self.url("/llu/connections"))
            .header("product", PRODUCT_HEADER)
            .header("version", VERSION_HEADER)
            .header("account-id", account_id)
            .bearer_auth(token)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| {
                ClientError::Protocol(format!("connections response decode failed: {e}"))
            })?;

        if body.status != 0 {
            return Err(ClientError::Protocol(format!(
                "connections returned status {}",
                body.status
            )));
        }

        let connections = body.data.unwrap_or_default();
        match connections.into_iter().next() {
            Some(conn) => Ok(conn.patient_id),
            None => Err(ClientError::Protocol(
                "connections array is empty; no patient linked to this account".to_string(),
            )),
        }
    }

    /// Fetch the latest connection payload for the session's patient.
    /// Requires an unexpired token; the caller refreshes proactively.
    pub async fn fetch_latest(
        &self,
        session: &AuthSession,
    ) -> Result<ConnectionPayload, ClientError> {
        session.validate(Utc::now())?;

        let path = format!("/llu/connections/{}/graph", session.patient_id);
        let body: GraphResponse = self
            .http
            .get(self.url(&path))
            .header("product", PRODUCT_HEADER)
            .header("version", VERSION_HEADER)
            .header("account-id", &session.account_id)
            .bearer_auth(&session.token)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Protocol(format!("graph response decode failed: {e}")))?;

        if body.status != 0 {
            return Err(ClientError::Protocol(format!(
                "graph returned status {}",
                body.status
            )));
        }

        body.data
            .ok_or_else(|| ClientError::Protocol("graph response carried no data".to_string()))
    }
}

impl Default for LinkUpClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(token: &str, expires_in: Duration) -> AuthSession {
        AuthSession {
            token: token.to_string(),
            expires_at: Utc::now() + expires_in,
            duration_secs: expires_in.num_seconds(),
            user_id: "user-1".to_string(),
            patient_id: "patient-1".to_string(),
            account_id: account_id_for("user-1"),
        }
    }

    #[test]
    fn token_without_three_parts_is_auth_error() {
        for bad in ["", "abc", "a.b", "a.b.c.d"] {
            let s = session(bad, Duration::hours(1));
            assert!(
                matches!(s.validate(Utc::now()), Err(ClientError::Auth(_))),
                "token '{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn expired_token_is_auth_error() {
        let s = session("a.b.c", Duration::seconds(-1));
        assert!(matches!(s.validate(Utc::now()), Err(ClientError::Auth(_))));
    }

    #[test]
    fn valid_token_passes() {
        let s = session("a.b.c", Duration::hours(1));
        assert!(s.validate(Utc::now()).is_ok());
    }

    #[test]
    fn refresh_window_triggers_before_expiry() {
        let s = session("a.b.c", Duration::minutes(3));
        let now = Utc::now();
        assert!(s.needs_refresh(std::time::Duration::from_secs(300), now));
        assert!(!s.needs_refresh(std::time::Duration::from_secs(60), now));
    }

    #[test]
    fn account_id_is_lowercase_sha256_hex() {
        let id = account_id_for("user-1");
        assert_eq!(id.len(), 64);
        assert_eq!(id, id.to_lowercase());
        // Stable digest for a fixed input.
        assert_eq!(
            account_id_for(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn debug_never_exposes_the_token() {
        let s = session("secret.jwt.token", Duration::hours(1));
        let rendered = format!("{s:?}");
        assert!(!rendered.contains("secret"));
    }
}
