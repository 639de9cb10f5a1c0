//! Email and password authentication with a locally persisted session.
//!
//! [`AuthSession`] owns the signed-in state for the lifetime of the process
//! and mirrors it to a JSON file so a later run starts signed in. An expired
//! session is renewed with its refresh token on first use. The auth backend
//! itself sits behind [`AuthProvider`]; [`GoTrueClient`] speaks the GoTrue
//! REST protocol used by the hosted backend.

use crate::error::{FrameError, FrameResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Permissions of the session file; it holds bearer and refresh tokens
#[cfg(unix)]
const SESSION_FILE_MODE: u32 = 0o600;

/// The authenticated identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// A signed-in session as issued by the auth backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Absent when the backend did not report a lifetime
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Remote auth backend
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Register an account; the backend sends a confirmation challenge
    async fn sign_up(&self, email: &str, password: &str) -> FrameResult<()>;

    /// Exchange credentials for a session
    async fn sign_in_with_password(&self, email: &str, password: &str) -> FrameResult<Session>;

    /// Exchange a refresh token for a new session
    async fn refresh_session(&self, refresh_token: &str) -> FrameResult<Session>;

    /// Revoke the session behind `access_token`
    async fn sign_out(&self, access_token: &str) -> FrameResult<()>;
}

/// The application's single auth session
pub struct AuthSession {
    provider: Arc<dyn AuthProvider>,
    session_file: Option<PathBuf>,
    current: RwLock<Option<Session>>,
}

impl AuthSession {
    /// Session kept in memory only
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        Self {
            provider,
            session_file: None,
            current: RwLock::new(None),
        }
    }

    /// Session mirrored to `session_file`, restoring it if one was saved
    pub async fn persisted(provider: Arc<dyn AuthProvider>, session_file: PathBuf) -> Self {
        let restored = load_session(&session_file).await;

        if let Some(ref session) = restored {
            debug!(user_id = %session.user.id, "Restored persisted session");
        }

        Self {
            provider,
            session_file: Some(session_file),
            current: RwLock::new(restored),
        }
    }

    /// Register a new account
    ///
    /// Does not sign in: the account must be confirmed first.
    #[instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> FrameResult<()> {
        let email = require_credentials(email, password)?;
        self.provider.sign_up(email, password).await?;
        info!("Sign-up accepted, confirmation sent");
        Ok(())
    }

    /// Sign in and persist the resulting session
    #[instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> FrameResult<AuthUser> {
        let email = require_credentials(email, password)?;
        let session = self.provider.sign_in_with_password(email, password).await?;
        let user = session.user.clone();

        self.replace(session).await;
        info!(user_id = %user.id, "Signed in");

        Ok(user)
    }

    /// Clear the session locally and revoke it remotely
    ///
    /// Idempotent. Remote revocation is best effort: a failure is logged and
    /// the local session is cleared regardless.
    #[instrument(skip(self))]
    pub async fn sign_out(&self) -> FrameResult<()> {
        let previous = self.write_current().take();

        if let Some(ref path) = self.session_file {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(error = %e, path = %path.display(), "Failed to remove session file"),
            }
        }

        if let Some(session) = previous {
            if let Err(e) = self.provider.sign_out(&session.access_token).await {
                warn!(error = %e, "Remote sign-out failed");
            }
            info!(user_id = %session.user.id, "Signed out");
        }

        Ok(())
    }

    /// The signed-in user, renewing an expired session first
    ///
    /// Returns `None` when nobody is signed in, or when the session expired
    /// and could not be refreshed. A failed refresh keeps the stored session
    /// so a later call can retry.
    #[instrument(skip(self))]
    pub async fn active_user(&self) -> Option<AuthUser> {
        let session = self.read_current()?;
        if !session.is_expired(Utc::now()) {
            return Some(session.user);
        }

        let Some(refresh_token) = session.refresh_token else {
            debug!("Session expired without a refresh token");
            return None;
        };

        match self.provider.refresh_session(&refresh_token).await {
            Ok(renewed) => {
                let user = renewed.user.clone();
                self.replace(renewed).await;
                info!(user_id = %user.id, "Session refreshed");
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "Session refresh failed");
                None
            }
        }
    }

    /// The signed-in user without contacting the backend
    ///
    /// An expired session reads as signed out; see [`AuthSession::active_user`].
    pub fn current_user(&self) -> Option<AuthUser> {
        self.read_current()
            .filter(|session| !session.is_expired(Utc::now()))
            .map(|session| session.user)
    }

    /// Bearer token of the current session
    pub fn access_token(&self) -> Option<String> {
        self.read_current()
            .filter(|session| !session.is_expired(Utc::now()))
            .map(|session| session.access_token)
    }

    async fn replace(&self, session: Session) {
        if let Some(ref path) = self.session_file {
            if let Err(e) = store_session(path, &session).await {
                warn!(error = %e, path = %path.display(), "Failed to persist session");
            }
        }
        *self.write_current() = Some(session);
    }

    fn read_current(&self) -> Option<Session> {
        let guard = match self.current.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Trim the email and reject blank credentials before any network call
fn require_credentials<'a>(email: &'a str, password: &str) -> FrameResult<&'a str> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(FrameError::validation("Please provide email and password."));
    }
    Ok(email)
}

async fn load_session(path: &Path) -> Option<Session> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Failed to read session file");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(session) => Some(session),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Ignoring unreadable session file");
            None
        }
    }
}

/// Write the session, readable by the owner only
async fn store_session(path: &Path, session: &Session) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let raw = serde_json::to_vec_pretty(session)?;

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(SESSION_FILE_MODE);

    let mut file = options.open(path).await?;
    // `mode` only applies on creation; tighten a file left by an older run.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(SESSION_FILE_MODE))
            .await?;
    }
    file.write_all(&raw).await?;
    file.flush().await
}

/// GoTrue REST client
pub struct GoTrueClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| now + ChronoDuration::seconds(secs)),
            user: self.user,
        }
    }
}

/// Error body; GoTrue versions disagree on the field name
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    msg: Option<String>,
    error_description: Option<String>,
    message: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.msg.or(self.error_description).or(self.message)
    }
}

impl GoTrueClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> FrameResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FrameError::auth(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> FrameResult<reqwest::Response> {
        let response = request
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| FrameError::auth(format!("Auth service unreachable: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorBody = response.json().await.unwrap_or_default();
        let message = body
            .into_message()
            .unwrap_or_else(|| format!("Auth request failed with HTTP {}", status.as_u16()));
        Err(FrameError::auth(message))
    }

    /// `POST /token?grant_type=<grant_type>` and build the session it issues
    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> FrameResult<Session> {
        let request = self
            .client
            .post(self.endpoint("token"))
            .query(&[("grant_type", grant_type)])
            .json(&body);

        let token: TokenResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| FrameError::auth(format!("Unexpected auth response: {e}")))?;

        Ok(token.into_session(Utc::now()))
    }
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    async fn sign_up(&self, email: &str, password: &str) -> FrameResult<()> {
        let request = self
            .client
            .post(self.endpoint("signup"))
            .json(&serde_json::json!({ "email": email, "password": password }));
        self.send(request).await?;
        Ok(())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> FrameResult<Session> {
        self.token_grant(
            "password",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    async fn refresh_session(&self, refresh_token: &str) -> FrameResult<Session> {
        self.token_grant(
            "refresh_token",
            serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> FrameResult<()> {
        let request = self
            .client
            .post(self.endpoint("logout"))
            .bearer_auth(access_token);
        self.send(request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn test_session(expires_at: Option<DateTime<Utc>>) -> Session {
        Session {
            access_token: "token-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at,
            user: AuthUser {
                id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
                email: Some("ana@example.com".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn test_sign_in_establishes_session() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in_with_password()
            .with(eq("ana@example.com"), eq("secret"))
            .times(1)
            .returning(|_, _| Ok(test_session(None)));

        let session = AuthSession::new(Arc::new(provider));
        assert!(session.current_user().is_none());

        let user = session.sign_in("  ana@example.com ", "secret").await.unwrap();
        assert_eq!(session.current_user(), Some(user));
        assert_eq!(session.access_token().as_deref(), Some("token-1"));
    }

    #[tokio::test]
    async fn test_blank_credentials_rejected_locally() {
        let mut provider = MockAuthProvider::new();
        provider.expect_sign_in_with_password().times(0);
        provider.expect_sign_up().times(0);

        let session = AuthSession::new(Arc::new(provider));
        let err = session.sign_in("   ", "secret").await.unwrap_err();
        assert!(matches!(err, FrameError::Validation { .. }));
        let err = session.sign_up("ana@example.com", "").await.unwrap_err();
        assert!(matches!(err, FrameError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_sign_in_failure_leaves_state_unchanged() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in_with_password()
            .returning(|_, _| Err(FrameError::auth("Invalid login credentials")));

        let session = AuthSession::new(Arc::new(provider));
        let err = session.sign_in("ana@example.com", "wrong").await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid login credentials");
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_is_idempotent() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in_with_password()
            .returning(|_, _| Ok(test_session(None)));
        provider
            .expect_sign_out()
            .with(eq("token-1"))
            .times(1)
            .returning(|_| Ok(()));

        let session = AuthSession::new(Arc::new(provider));
        session.sign_in("ana@example.com", "secret").await.unwrap();

        session.sign_out().await.unwrap();
        session.sign_out().await.unwrap();
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn test_remote_sign_out_failure_still_clears_session() {
        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in_with_password()
            .returning(|_, _| Ok(test_session(None)));
        provider
            .expect_sign_out()
            .returning(|_| Err(FrameError::auth("network down")));

        let session = AuthSession::new(Arc::new(provider));
        session.sign_in("ana@example.com", "secret").await.unwrap();
        session.sign_out().await.unwrap();
        assert!(session.current_user().is_none());
    }

    #[tokio::test]
    async fn test_session_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut provider = MockAuthProvider::new();
        provider
            .expect_sign_in_with_password()
            .returning(|_, _| Ok(test_session(None)));
        provider.expect_sign_out().returning(|_| Ok(()));
        let provider: Arc<dyn AuthProvider> = Arc::new(provider);

        let first = AuthSession::persisted(provider.clone(), path.clone()).await;
        let user = first.sign_in("ana@example.com", "secret").await.unwrap();

        let second = AuthSession::persisted(provider.clone(), path.clone()).await;
        assert_eq!(second.current_user(), Some(user));

        second.sign_out().await.unwrap();
        assert!(!path.exists());
        let third = AuthSession::persisted(provider, path).await;
        assert!(third.current_user().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        store_session(&path, &test_session(None)).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_expired_session_without_refresh_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut expired = test_session(Some(Utc::now() - ChronoDuration::minutes(5)));
        expired.refresh_token = None;
        store_session(&path, &expired).await.unwrap();

        let mut provider = MockAuthProvider::new();
        provider.expect_refresh_session().times(0);

        let session = AuthSession::persisted(Arc::new(provider), path).await;
        assert!(session.current_user().is_none());
        assert!(session.access_token().is_none());
        assert!(session.active_user().await.is_none());
    }

    #[tokio::test]
    async fn test_expired_session_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let expired = test_session(Some(Utc::now() - ChronoDuration::minutes(5)));
        store_session(&path, &expired).await.unwrap();

        let mut provider = MockAuthProvider::new();
        provider
            .expect_refresh_session()
            .with(eq("refresh-1"))
            .times(1)
            .returning(|_| {
                let mut renewed = test_session(Some(Utc::now() + ChronoDuration::hours(1)));
                renewed.access_token = "token-2".to_string();
                renewed.refresh_token = Some("refresh-2".to_string());
                Ok(renewed)
            });
        let provider: Arc<dyn AuthProvider> = Arc::new(provider);

        let session = AuthSession::persisted(provider.clone(), path.clone()).await;
        assert!(session.current_user().is_none());

        let user = session.active_user().await.unwrap();
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
        assert_eq!(session.current_user(), Some(user.clone()));
        assert_eq!(session.access_token().as_deref(), Some("token-2"));

        // A later run starts from the renewed session without refreshing again.
        let next_run = AuthSession::persisted(provider, path).await;
        assert_eq!(next_run.active_user().await, Some(user));
        assert_eq!(next_run.access_token().as_deref(), Some("token-2"));
    }

    #[tokio::test]
    async fn test_failed_refresh_reads_as_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let expired = test_session(Some(Utc::now() - ChronoDuration::minutes(5)));
        store_session(&path, &expired).await.unwrap();

        let mut provider = MockAuthProvider::new();
        provider
            .expect_refresh_session()
            .times(1)
            .returning(|_| Err(FrameError::auth("Invalid Refresh Token")));

        let session = AuthSession::persisted(Arc::new(provider), path.clone()).await;
        assert!(session.active_user().await.is_none());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_corrupt_session_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let session = AuthSession::persisted(Arc::new(MockAuthProvider::new()), path).await;
        assert!(session.current_user().is_none());
    }

    #[test]
    fn test_error_body_field_precedence() {
        let body: ErrorBody =
            serde_json::from_str(r#"{"error_description":"Email not confirmed"}"#).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("Email not confirmed"));

        let body: ErrorBody =
            serde_json::from_str(r#"{"msg":"User already registered","message":"x"}"#).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("User already registered"));
    }

    #[test]
    fn test_token_response_parses_user() {
        let token: TokenResponse = serde_json::from_str(
            r#"{
                "access_token": "abc",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "def",
                "user": {"id": "550e8400-e29b-41d4-a716-446655440000", "email": "ana@example.com", "role": "authenticated"}
            }"#,
        )
        .unwrap();
        assert_eq!(token.access_token, "abc");
        assert_eq!(token.expires_in, Some(3600));
        assert_eq!(token.user.email.as_deref(), Some("ana@example.com"));

        let now = Utc::now();
        let session = token.into_session(now);
        assert_eq!(session.expires_at, Some(now + ChronoDuration::seconds(3600)));
        assert_eq!(session.refresh_token.as_deref(), Some("def"));
    }
}
