// Authentication orchestrator
// Composes the credential store, token services, session store and
// blacklist into the register / login / refresh / logout flows. Login
// failures converge on InvalidCredentials whichever check failed.

use std::sync::Arc;

use chrono::{Duration, Utc};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{DieselPool, RedisPool};
use crate::models::auth::AccessTokenClaims;
use crate::models::refresh_token::{RefreshToken, RefreshTokenError};
use crate::models::session::{NewSession, SessionError};
use crate::models::user::{NewUser, User, UserError, UserRole, UserStatus};
use crate::services::access_token::{AccessTokenError, AccessTokenService};
use crate::services::refresh_token::{ClientInfo, RefreshServiceError, RefreshTokenService};
use crate::services::session::{SessionService, SessionStoreError};
use crate::services::token_blacklist::TokenBlacklist;
use crate::utils::password::{hash_password, verify_password};
use crate::utils::problem::{ApiError, FieldError};
use crate::utils::validation::{
    normalize_email, validate_email, validate_password_strength, validate_username,
};

/// Hash of a throwaway password. Verified against when the user lookup
/// fails so the missing-user path costs the same as a wrong password.
const DUMMY_PASSWORD_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$vZGluZ3NhbHQxMjM0NTY$GVSsHJTYGVksVtBB0HcDjDYA2bXB7T8JCg1NPFUMkbc";

/// Tracks the newest access-token JTI per session so replay handling and
/// bulk logout can blacklist tokens they never saw.
const SESSION_JTI_PREFIX: &str = "auth:session-jti:";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is suspended")]
    AccountSuspended,

    #[error("Account has been deleted")]
    AccountDeleted,

    #[error("Account is not active")]
    AccountLocked,

    #[error("Email already registered")]
    EmailAlreadyExists,

    #[error("Username already taken")]
    UsernameAlreadyExists,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token revoked")]
    TokenRevoked,

    #[error("Token blacklisted")]
    TokenBlacklisted,

    #[error("Token replay detected")]
    TokenReplayDetected,

    #[error("Session not found")]
    SessionNotFound,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(fields) => ApiError::Validation(fields),
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::AccountSuspended => ApiError::AccountSuspended,
            AuthError::AccountDeleted => ApiError::AccountDeleted,
            AuthError::AccountLocked => ApiError::AccountLocked,
            AuthError::EmailAlreadyExists => ApiError::EmailAlreadyExists,
            AuthError::UsernameAlreadyExists => ApiError::UsernameAlreadyExists,
            AuthError::InvalidToken => ApiError::InvalidToken,
            AuthError::TokenExpired => ApiError::TokenExpired,
            AuthError::TokenRevoked => ApiError::TokenRevoked,
            AuthError::TokenBlacklisted => ApiError::TokenBlacklisted,
            AuthError::TokenReplayDetected => ApiError::TokenReplayDetected,
            AuthError::SessionNotFound => ApiError::SessionNotFound,
            AuthError::Internal(detail) => ApiError::Internal(detail),
        }
    }
}

impl From<RefreshServiceError> for AuthError {
    fn from(err: RefreshServiceError) -> Self {
        match err {
            RefreshServiceError::Token(RefreshTokenError::NotFound) => AuthError::InvalidToken,
            RefreshServiceError::Token(RefreshTokenError::Expired) => AuthError::TokenExpired,
            RefreshServiceError::Token(RefreshTokenError::ReplayDetected) => {
                AuthError::TokenReplayDetected
            },
            RefreshServiceError::Token(RefreshTokenError::Revoked) => AuthError::TokenRevoked,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<SessionStoreError> for AuthError {
    fn from(err: SessionStoreError) -> Self {
        match err {
            SessionStoreError::Session(SessionError::NotFound) => AuthError::SessionNotFound,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

impl From<AccessTokenError> for AuthError {
    fn from(err: AccessTokenError) -> Self {
        match err {
            AccessTokenError::Expired => AuthError::TokenExpired,
            AccessTokenError::Invalid | AccessTokenError::WrongTokenType => AuthError::InvalidToken,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

/// The pair returned by login and refresh.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub email: String,
    pub username: String,
    pub password: String,
}

pub struct AuthService {
    db_pool: DieselPool,
    redis_pool: RedisPool,
    access_tokens: Arc<AccessTokenService>,
    refresh_tokens: Arc<RefreshTokenService>,
    sessions: Arc<SessionService>,
    blacklist: Arc<TokenBlacklist>,
}

impl AuthService {
    pub fn new(
        db_pool: DieselPool,
        redis_pool: RedisPool,
        access_tokens: Arc<AccessTokenService>,
        refresh_tokens: Arc<RefreshTokenService>,
        sessions: Arc<SessionService>,
        blacklist: Arc<TokenBlacklist>,
    ) -> Self {
        Self {
            db_pool,
            redis_pool,
            access_tokens,
            refresh_tokens,
            sessions,
            blacklist,
        }
    }

    pub fn sessions(&self) -> &SessionService {
        &self.sessions
    }

    async fn db_conn(
        &self,
    ) -> Result<
        bb8::PooledConnection<
            '_,
            diesel_async::pooled_connection::AsyncDieselConnectionManager<
                diesel_async::AsyncPgConnection,
            >,
        >,
        AuthError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Register a new account and log it in.
    pub async fn register(
        &self,
        input: RegisterInput,
        client: ClientInfo,
    ) -> Result<(User, TokenPair), AuthError> {
        let mut field_errors = Vec::new();
        if let Err(message) = validate_email(&input.email) {
            field_errors.push(FieldError {
                field: "email".to_string(),
                message,
            });
        }
        if let Err(message) = validate_username(&input.username) {
            field_errors.push(FieldError {
                field: "username".to_string(),
                message,
            });
        }
        if let Err(message) = validate_password_strength(&input.password) {
            field_errors.push(FieldError {
                field: "password".to_string(),
                message,
            });
        }
        if !field_errors.is_empty() {
            return Err(AuthError::Validation(field_errors));
        }

        let password_hash =
            hash_password(&input.password).map_err(|e| AuthError::Internal(e.to_string()))?;

        let new_user = NewUser {
            email: normalize_email(&input.email),
            username: input.username.trim().to_string(),
            password_hash,
            role: UserRole::User.as_str().to_string(),
            status: UserStatus::Active.as_str().to_string(),
        };

        let mut conn = self.db_conn().await?;
        // Uniqueness races resolve in the database; the unique indexes tell
        // us which field collided.
        let user = User::create(&mut conn, new_user).await.map_err(|e| match e {
            UserError::EmailTaken => AuthError::EmailAlreadyExists,
            UserError::UsernameTaken => AuthError::UsernameAlreadyExists,
            other => AuthError::Internal(other.to_string()),
        })?;
        drop(conn);

        info!(user_id = %user.id, "registered new account");

        let pair = self.open_session(&user, client).await?;
        Ok((user, pair))
    }

    /// Authenticate by email or username and open a session.
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        client: ClientInfo,
    ) -> Result<(User, TokenPair), AuthError> {
        let mut conn = self.db_conn().await?;
        let lookup = User::find_by_identifier(&mut conn, identifier).await;
        drop(conn);

        let user = match lookup {
            Ok(user) => user,
            Err(UserError::NotFound) => {
                // Burn a verification anyway so this path is not measurably
                // faster than a wrong password.
                let _ = verify_password(password, DUMMY_PASSWORD_HASH);
                return Err(AuthError::InvalidCredentials);
            },
            Err(e) => return Err(AuthError::Internal(e.to_string())),
        };

        let password_ok = verify_password(password, &user.password_hash)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        if !password_ok {
            return Err(AuthError::InvalidCredentials);
        }

        if !user.can_login() {
            return Err(match user.status() {
                UserStatus::Suspended => AuthError::AccountSuspended,
                UserStatus::Deleted => AuthError::AccountDeleted,
                _ => AuthError::AccountLocked,
            });
        }

        let pair = self.open_session(&user, client).await?;
        Ok((user, pair))
    }

    /// Mint an access token, a fresh-family refresh token and the session
    /// backing them. The durable session write gates the whole operation:
    /// if it fails, the refresh token is withdrawn and no pair is returned.
    async fn open_session(&self, user: &User, client: ClientInfo) -> Result<TokenPair, AuthError> {
        let session_id = Uuid::new_v4();

        let (access_token, claims) =
            self.access_tokens
                .generate(user.id, &user.email, user.role(), session_id)?;

        let (refresh_token, metadata) = self
            .refresh_tokens
            .generate(user.id, session_id, None, None, client.clone())
            .await?;

        let created = self
            .sessions
            .create(NewSession {
                id: session_id,
                user_id: user.id,
                refresh_token_hash: metadata.token_hash.clone(),
                ip_address: client.ip_address,
                user_agent: client.user_agent,
                expires_at: metadata.expires_at,
            })
            .await;

        if let Err(e) = created {
            let _ = self
                .refresh_tokens
                .revoke_token(&refresh_token, "session_create_failed")
                .await;
            return Err(e.into());
        }

        self.remember_session_jti(session_id, &claims.jti).await;

        Ok(TokenPair {
            access_token,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_tokens.ttl(),
        })
    }

    /// Rotate a refresh token. A replayed token revokes its whole family,
    /// blacklists the session's latest access token and kills the session.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        let metadata = match self.refresh_tokens.validate(refresh_token).await {
            Ok(metadata) => metadata,
            Err(RefreshServiceError::Token(RefreshTokenError::ReplayDetected)) => {
                let metadata = self.peek_metadata(refresh_token).await;
                if let Some(metadata) = metadata {
                    self.handle_replay(&metadata).await;
                }
                return Err(AuthError::TokenReplayDetected);
            },
            Err(e) => return Err(e.into()),
        };

        if RefreshTokenService::detect_anomalies(
            &metadata,
            client.ip_address.as_deref(),
            client.user_agent.as_deref(),
        ) {
            // Advisory only; policy here is to log and continue.
            warn!(
                user_id = %metadata.user_id,
                session_id = %metadata.session_id,
                "refresh client fingerprint changed within token family"
            );
        }

        let mut conn = self.db_conn().await?;
        let user = User::find_by_id(&mut conn, metadata.user_id)
            .await
            .map_err(|e| match e {
                UserError::NotFound => AuthError::InvalidToken,
                other => AuthError::Internal(other.to_string()),
            })?;
        drop(conn);

        if !user.can_login() {
            return Err(match user.status() {
                UserStatus::Suspended => AuthError::AccountSuspended,
                UserStatus::Deleted => AuthError::AccountDeleted,
                _ => AuthError::AccountLocked,
            });
        }

        // Consume the parent and issue its child atomically. Losing the CAS
        // means a concurrent presentation already rotated this token.
        let rotated = self
            .refresh_tokens
            .rotate(&metadata, refresh_token, client.clone())
            .await;

        let (new_refresh, new_metadata) = match rotated {
            Ok(pair) => pair,
            Err(RefreshServiceError::Token(RefreshTokenError::ReplayDetected)) => {
                self.handle_replay(&metadata).await;
                return Err(AuthError::TokenReplayDetected);
            },
            Err(e) => return Err(e.into()),
        };

        self.sessions
            .update_refresh_hash(
                metadata.session_id,
                &new_metadata.token_hash,
                new_metadata.expires_at,
            )
            .await?;

        let (access_token, claims) =
            self.access_tokens
                .generate(user.id, &user.email, user.role(), metadata.session_id)?;
        self.remember_session_jti(metadata.session_id, &claims.jti)
            .await;

        Ok(TokenPair {
            access_token,
            refresh_token: new_refresh,
            token_type: "Bearer".to_string(),
            expires_in: self.access_tokens.ttl(),
        })
    }

    /// Replay response: one-way family revocation, access-token blacklist,
    /// session teardown.
    async fn handle_replay(&self, metadata: &RefreshToken) {
        warn!(
            user_id = %metadata.user_id,
            session_id = %metadata.session_id,
            family_id = %metadata.family_id,
            "refresh token replay detected"
        );

        if let Err(e) = self
            .refresh_tokens
            .revoke_family(metadata.family_id, "replay_detected")
            .await
        {
            warn!("family revocation failed during replay handling: {}", e);
        }

        self.blacklist_session_jti(metadata.session_id).await;

        if let Err(e) = self.sessions.revoke(metadata.session_id).await {
            warn!("session revocation failed during replay handling: {}", e);
        }
    }

    /// Log out one session. Missing pieces are not errors; logging out
    /// twice succeeds both times.
    pub async fn logout(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        // The access token may already be expired; parse without validating
        // so its JTI can still be blacklisted for the remainder, if any.
        if let (Ok(jti), Ok(expires_at)) = (
            self.access_tokens.extract_token_id(access_token),
            self.access_tokens.token_expiration(access_token),
        ) {
            if let Err(e) = self.blacklist.add(&jti, expires_at).await {
                warn!("blacklist write failed during logout: {}", e);
            }
        }

        // Session teardown works from the unverified claims too; an expired
        // token should still end its session.
        if let Ok(sid) = self.access_tokens.extract_session_id(access_token) {
            if let Ok(session_id) = Uuid::parse_str(&sid) {
                if let Err(e) = self.sessions.revoke(session_id).await {
                    warn!("session revoke failed during logout: {}", e);
                }
            }
        }

        if let Some(token) = refresh_token {
            if let Err(e) = self.refresh_tokens.revoke_token(token, "logout").await {
                warn!("refresh token revoke failed during logout: {}", e);
            }
        }

        Ok(())
    }

    /// Log out every device: blacklist each session's latest access token,
    /// revoke all sessions and all refresh tokens.
    pub async fn logout_all(&self, user_id: Uuid) -> Result<usize, AuthError> {
        let revoked = self.sessions.revoke_all(user_id).await?;
        for session in &revoked {
            self.blacklist_session_jti(session.id).await;
        }

        self.refresh_tokens
            .revoke_all_for_user(user_id, "logout_all")
            .await?;

        info!(%user_id, sessions = revoked.len(), "revoked all sessions");
        Ok(revoked.len())
    }

    /// Delete an account. The row is retained as `deleted`; every session
    /// is revoked and every outstanding token blacklisted or revoked, since
    /// the blacklist lives outside the relational store and cannot ride on
    /// a database cascade.
    pub async fn delete_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        let mut conn = self.db_conn().await?;
        User::mark_deleted(&mut conn, user_id)
            .await
            .map_err(|e| match e {
                UserError::NotFound => AuthError::InvalidCredentials,
                other => AuthError::Internal(other.to_string()),
            })?;
        drop(conn);

        self.logout_all(user_id).await?;
        info!(%user_id, "account deleted");
        Ok(())
    }

    /// Full access-token validation: signature and claims, then blacklist,
    /// then session existence.
    pub async fn validate_token(&self, access_token: &str) -> Result<AccessTokenClaims, AuthError> {
        let claims = self.access_tokens.validate(access_token)?;

        if self
            .blacklist
            .is_blacklisted(&claims.jti)
            .await
            .map_err(|e| AuthError::Internal(e.to_string()))?
        {
            return Err(AuthError::TokenBlacklisted);
        }

        let session_id = Uuid::parse_str(&claims.sid).map_err(|_| AuthError::InvalidToken)?;
        if !self.sessions.exists(session_id).await? {
            return Err(AuthError::SessionNotFound);
        }

        Ok(claims)
    }

    /// Fetch token metadata even when validation failed, for replay
    /// handling. Returns None when the hash is unknown.
    async fn peek_metadata(&self, refresh_token: &str) -> Option<RefreshToken> {
        let mut conn = self.db_conn().await.ok()?;
        RefreshToken::find_by_hash(&mut conn, &RefreshToken::hash_token(refresh_token))
            .await
            .ok()
    }

    fn session_jti_key(session_id: Uuid) -> String {
        format!("{}{}", SESSION_JTI_PREFIX, session_id)
    }

    /// Remember the newest access-token JTI for a session so it can be
    /// blacklisted later without seeing the token again.
    async fn remember_session_jti(&self, session_id: Uuid, jti: &str) {
        match self.redis_pool.get_connection().await {
            Ok(mut conn) => {
                if let Err(e) = conn
                    .set_ex::<_, _, ()>(
                        Self::session_jti_key(session_id),
                        jti,
                        self.access_tokens.ttl(),
                    )
                    .await
                {
                    warn!(%session_id, "session jti bookkeeping failed: {}", e);
                }
            },
            Err(e) => warn!("session jti bookkeeping unavailable: {}", e),
        }
    }

    /// Blacklist the latest known access token of a session, if any.
    async fn blacklist_session_jti(&self, session_id: Uuid) {
        let Ok(mut conn) = self.redis_pool.get_connection().await else {
            return;
        };
        let jti: Option<String> = conn
            .get(Self::session_jti_key(session_id))
            .await
            .unwrap_or(None);

        if let Some(jti) = jti {
            let until = Utc::now() + Duration::seconds(self.access_tokens.ttl() as i64);
            if let Err(e) = self.blacklist.add(&jti, until).await {
                warn!(%session_id, "blacklisting session jti failed: {}", e);
            }
        }
    }
}
