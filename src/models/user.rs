// User database model

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::users;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    User,
    Moderator,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Moderator => "moderator",
            UserRole::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "moderator" => Ok(UserRole::Moderator),
            "admin" => Ok(UserRole::Admin),
            other => Err(format!("Invalid user role: {}", other)),
        }
    }
}

/// Account lifecycle state. Only active accounts may open sessions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserStatus {
    Pending,
    Active,
    Suspended,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Deleted => "deleted",
        }
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UserStatus::Pending),
            "active" => Ok(UserStatus::Active),
            "suspended" => Ok(UserStatus::Suspended),
            "deleted" => Ok(UserStatus::Deleted),
            other => Err(format!("Invalid user status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub status: String,
}

#[derive(thiserror::Error, Debug)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("User not found")]
    NotFound,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Username already taken")]
    UsernameTaken,
}

impl From<diesel::result::Error> for UserError {
    fn from(err: diesel::result::Error) -> Self {
        match &err {
            diesel::result::Error::NotFound => UserError::NotFound,
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                // The unique index that fired tells us which field collided.
                match info.constraint_name() {
                    Some("users_email_unique") => UserError::EmailTaken,
                    Some("users_username_unique") => UserError::UsernameTaken,
                    _ => UserError::Database(err),
                }
            },
            _ => UserError::Database(err),
        }
    }
}

impl User {
    pub fn role(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::User)
    }

    pub fn status(&self) -> UserStatus {
        self.status.parse().unwrap_or(UserStatus::Deleted)
    }

    /// Whether this account is allowed to open a new session.
    pub fn can_login(&self) -> bool {
        self.status() == UserStatus::Active
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Self, UserError> {
        users::table
            .find(user_id)
            .first::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Look up by email or username. The identifier is matched against both
    /// columns so login can accept either; deleted accounts never match.
    pub async fn find_by_identifier(
        conn: &mut AsyncPgConnection,
        identifier: &str,
    ) -> Result<Self, UserError> {
        use crate::schema::users::dsl::*;

        let normalized = identifier.trim().to_lowercase();

        users
            .filter(
                email
                    .eq(&normalized)
                    .or(username.eq(identifier.trim())),
            )
            .filter(status.ne(UserStatus::Deleted.as_str()))
            .first::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Insert a new account. Uniqueness races resolve through the partial
    /// unique indexes and surface as EmailTaken / UsernameTaken.
    pub async fn create(
        conn: &mut AsyncPgConnection,
        new_user: NewUser,
    ) -> Result<Self, UserError> {
        diesel::insert_into(users::table)
            .values(&new_user)
            .get_result::<User>(conn)
            .await
            .map_err(UserError::from)
    }

    /// Soft-delete: the row is retained, the account can no longer log in,
    /// and email/username become reusable.
    pub async fn mark_deleted(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<(), UserError> {
        use crate::schema::users::dsl::*;

        let updated = diesel::update(users.find(user_id))
            .set((
                status.eq(UserStatus::Deleted.as_str()),
                updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;

        if updated == 0 {
            return Err(UserError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_status(status: UserStatus) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            username: "alice".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "user".to_string(),
            status: status.as_str().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_only_active_accounts_can_login() {
        assert!(user_with_status(UserStatus::Active).can_login());
        assert!(!user_with_status(UserStatus::Pending).can_login());
        assert!(!user_with_status(UserStatus::Suspended).can_login());
        assert!(!user_with_status(UserStatus::Deleted).can_login());
    }

    #[test]
    fn test_role_and_status_parse() {
        for role in [UserRole::User, UserRole::Moderator, UserRole::Admin] {
            assert_eq!(role.as_str().parse::<UserRole>().unwrap(), role);
        }
        for status in [
            UserStatus::Pending,
            UserStatus::Active,
            UserStatus::Suspended,
            UserStatus::Deleted,
        ] {
            assert_eq!(status.as_str().parse::<UserStatus>().unwrap(), status);
        }
        assert!("superuser".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_unknown_role_defaults_to_user() {
        let mut user = user_with_status(UserStatus::Active);
        user.role = "mystery".to_string();
        assert_eq!(user.role(), UserRole::User);
    }
}
