// Session database model
// The durable row is authoritative; services/session.rs layers the Redis
// cache view on top of these statics.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::sessions;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Session not found")]
    NotFound,

    #[error("Cache error: {0}")]
    Cache(String),
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none() && self.expires_at > Utc::now()
    }

    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_session: NewSession,
    ) -> Result<Self, SessionError> {
        diesel::insert_into(sessions::table)
            .values(&new_session)
            .get_result::<Session>(conn)
            .await
            .map_err(SessionError::from)
    }

    /// Fetch a live session. Revoked or expired rows behave as absent.
    pub async fn find_active(
        conn: &mut AsyncPgConnection,
        session_id: Uuid,
    ) -> Result<Self, SessionError> {
        use crate::schema::sessions::dsl::*;

        let session = sessions
            .find(session_id)
            .first::<Session>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => SessionError::NotFound,
                other => SessionError::Database(other),
            })?;

        if !session.is_active() {
            return Err(SessionError::NotFound);
        }
        Ok(session)
    }

    /// Revoke one session. Already-revoked and missing sessions are fine;
    /// revocation is idempotent.
    pub async fn revoke(
        conn: &mut AsyncPgConnection,
        session_id: Uuid,
    ) -> Result<bool, SessionError> {
        use crate::schema::sessions::dsl::*;

        let updated = diesel::update(
            sessions
                .find(session_id)
                .filter(revoked_at.is_null()),
        )
        .set(revoked_at.eq(Some(Utc::now())))
        .execute(conn)
        .await?;

        Ok(updated > 0)
    }

    /// Revoke every live session for a user. Returns how many were revoked.
    pub async fn revoke_all_for_user(
        conn: &mut AsyncPgConnection,
        user_id_val: Uuid,
    ) -> Result<usize, SessionError> {
        use crate::schema::sessions::dsl::*;

        let updated = diesel::update(
            sessions
                .filter(user_id.eq(user_id_val))
                .filter(revoked_at.is_null()),
        )
        .set(revoked_at.eq(Some(Utc::now())))
        .execute(conn)
        .await?;

        Ok(updated)
    }

    /// All live sessions for a user, newest first. Feeds the multi-device
    /// session listing.
    pub async fn list_active_for_user(
        conn: &mut AsyncPgConnection,
        user_id_val: Uuid,
    ) -> Result<Vec<Self>, SessionError> {
        use crate::schema::sessions::dsl::*;

        let now = Utc::now();
        sessions
            .filter(user_id.eq(user_id_val))
            .filter(revoked_at.is_null())
            .filter(expires_at.gt(now))
            .order(created_at.desc())
            .load::<Session>(conn)
            .await
            .map_err(SessionError::from)
    }

    /// Swap in the hash of a newly rotated refresh token and push the
    /// session's horizon out to the new token's expiry.
    pub async fn update_refresh_hash(
        conn: &mut AsyncPgConnection,
        session_id: Uuid,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        use crate::schema::sessions::dsl::*;

        diesel::update(sessions.find(session_id).filter(revoked_at.is_null()))
            .set((
                refresh_token_hash.eq(new_hash),
                expires_at.eq(new_expires_at),
            ))
            .get_result::<Session>(conn)
            .await
            .map_err(|e| match e {
                diesel::result::Error::NotFound => SessionError::NotFound,
                other => SessionError::Database(other),
            })
    }

    /// Delete rows that can never validate again. Run periodically.
    pub async fn cleanup_expired(conn: &mut AsyncPgConnection) -> Result<usize, SessionError> {
        use crate::schema::sessions::dsl::*;

        let deleted = diesel::delete(
            sessions
                .filter(expires_at.le(Utc::now()))
                .or_filter(revoked_at.is_not_null()),
        )
        .execute(conn)
        .await?;

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(expires_in: Duration, revoked: bool) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            refresh_token_hash: "h".repeat(64),
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: Some("test-agent".to_string()),
            created_at: now,
            expires_at: now + expires_in,
            revoked_at: revoked.then(|| now),
        }
    }

    #[test]
    fn test_active_state() {
        assert!(session(Duration::hours(1), false).is_active());
        assert!(!session(Duration::hours(-1), false).is_active());
        assert!(!session(Duration::hours(1), true).is_active());
    }
}
