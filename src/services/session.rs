// Session store
// Sessions live in two places: the Postgres row is authoritative, and a
// Redis entry keyed by session id serves the hot validation path. The cache
// entry's TTL tracks the refresh token's remaining lifetime, and a miss
// falls back to the durable row and repopulates.

use chrono::Utc;
use redis::AsyncCommands;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{DieselPool, RedisPool};
use crate::models::session::{NewSession, Session, SessionError};

const SESSION_KEY_PREFIX: &str = "auth:session:";

#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

pub struct SessionService {
    db_pool: DieselPool,
    redis_pool: RedisPool,
}

impl SessionService {
    pub fn new(db_pool: DieselPool, redis_pool: RedisPool) -> Self {
        Self {
            db_pool,
            redis_pool,
        }
    }

    fn cache_key(session_id: Uuid) -> String {
        format!("{}{}", SESSION_KEY_PREFIX, session_id)
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
        SessionStoreError,
    > {
        self.db_pool
            .get()
            .await
            .map_err(|e| SessionStoreError::Pool(e.to_string()))
    }

    /// Write the cache view of a session. Failures degrade to the durable
    /// path, so they are logged rather than propagated.
    async fn cache_put(&self, session: &Session) {
        let ttl = (session.expires_at - Utc::now()).num_seconds();
        if ttl <= 0 {
            return;
        }

        let payload = match serde_json::to_string(session) {
            Ok(json) => json,
            Err(e) => {
                warn!(session_id = %session.id, "session cache serialize failed: {}", e);
                return;
            },
        };

        match self.redis_pool.get_connection().await {
            Ok(mut conn) => {
                if let Err(e) = conn
                    .set_ex::<_, _, ()>(Self::cache_key(session.id), payload, ttl as u64)
                    .await
                {
                    warn!(session_id = %session.id, "session cache write failed: {}", e);
                }
            },
            Err(e) => warn!("session cache unavailable: {}", e),
        }
    }

    async fn cache_get(&self, session_id: Uuid) -> Option<Session> {
        let mut conn = self.redis_pool.get_connection().await.ok()?;
        let payload: Option<String> = conn.get(Self::cache_key(session_id)).await.ok()?;
        let session: Session = serde_json::from_str(&payload?).ok()?;

        // TTL expiry normally removes stale entries, but guard against
        // clock skew between stores.
        session.is_active().then_some(session)
    }

    async fn cache_remove(&self, session_id: Uuid) {
        if let Ok(mut conn) = self.redis_pool.get_connection().await {
            if let Err(e) = conn.del::<_, ()>(Self::cache_key(session_id)).await {
                warn!(%session_id, "session cache delete failed: {}", e);
            }
        }
    }

    /// Create a session in both stores. The durable write happens first;
    /// if it fails no cache entry is created and the error propagates.
    pub async fn create(&self, new_session: NewSession) -> Result<Session, SessionStoreError> {
        let mut conn = self.db_conn().await?;
        let session = Session::create(&mut conn, new_session).await?;
        drop(conn);

        self.cache_put(&session).await;
        Ok(session)
    }

    /// Fetch a live session, cache first. A revoked or expired session is
    /// reported as not found.
    pub async fn get(&self, session_id: Uuid) -> Result<Session, SessionStoreError> {
        if let Some(session) = self.cache_get(session_id).await {
            return Ok(session);
        }

        debug!(%session_id, "session cache miss, falling back to database");
        let mut conn = self.db_conn().await?;
        let session = Session::find_active(&mut conn, session_id).await?;
        drop(conn);

        self.cache_put(&session).await;
        Ok(session)
    }

    pub async fn exists(&self, session_id: Uuid) -> Result<bool, SessionStoreError> {
        match self.get(session_id).await {
            Ok(_) => Ok(true),
            Err(SessionStoreError::Session(SessionError::NotFound)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Revoke one session in both stores. Idempotent.
    pub async fn revoke(&self, session_id: Uuid) -> Result<(), SessionStoreError> {
        let mut conn = self.db_conn().await?;
        Session::revoke(&mut conn, session_id).await?;
        drop(conn);

        self.cache_remove(session_id).await;
        Ok(())
    }

    /// Revoke every session for a user. Returns the sessions that were
    /// live beforehand so the caller can blacklist their access tokens.
    pub async fn revoke_all(&self, user_id: Uuid) -> Result<Vec<Session>, SessionStoreError> {
        let mut conn = self.db_conn().await?;
        let live = Session::list_active_for_user(&mut conn, user_id).await?;
        Session::revoke_all_for_user(&mut conn, user_id).await?;
        drop(conn);

        for session in &live {
            self.cache_remove(session.id).await;
        }
        Ok(live)
    }

    /// Record a rotated refresh token against its session and refresh the
    /// cache view.
    pub async fn update_refresh_hash(
        &self,
        session_id: Uuid,
        new_hash: &str,
        new_expires_at: chrono::DateTime<Utc>,
    ) -> Result<Session, SessionStoreError> {
        let mut conn = self.db_conn().await?;
        let session =
            Session::update_refresh_hash(&mut conn, session_id, new_hash, new_expires_at).await?;
        drop(conn);

        self.cache_put(&session).await;
        Ok(session)
    }

    /// Multi-device listing: all live sessions for a user.
    pub async fn get_user_sessions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<Session>, SessionStoreError> {
        let mut conn = self.db_conn().await?;
        let sessions = Session::list_active_for_user(&mut conn, user_id).await?;
        Ok(sessions)
    }
}
