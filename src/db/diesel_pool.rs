// Diesel-async connection pool over bb8

use anyhow::Context;
use bb8::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations};
use std::time::Duration;

// Embed migrations at compile time
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DieselPool = Pool<AsyncDieselConnectionManager<AsyncPgConnection>>;

/// Database pool configuration
#[derive(Debug, Clone)]
pub struct DieselDatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
    pub test_on_checkout: bool,
}

impl Default for DieselDatabaseConfig {
    fn default() -> Self {
        let config = crate::app_config::config();
        Self {
            url: config.database.url.clone(),
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            connection_timeout: Duration::from_secs(config.database.connect_timeout),
            idle_timeout: Duration::from_secs(config.database.idle_timeout),
            max_lifetime: Duration::from_secs(config.database.max_lifetime),
            test_on_checkout: true,
        }
    }
}

/// Create the connection pool and verify one connection can be checked out.
pub async fn create_diesel_pool(config: DieselDatabaseConfig) -> anyhow::Result<DieselPool> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(config.url.clone());

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(config.connection_timeout)
        .idle_timeout(Some(config.idle_timeout))
        .max_lifetime(Some(config.max_lifetime))
        .test_on_check_out(config.test_on_checkout)
        .build(manager)
        .await
        .context("build database pool")?;

    let conn = pool.get().await.context("checkout initial connection")?;
    drop(conn);

    tracing::info!(
        "database pool initialized with {} max connections",
        config.max_connections
    );

    Ok(pool)
}

/// Health check for the database pool.
pub async fn check_diesel_health(pool: &DieselPool) -> anyhow::Result<()> {
    let conn = pool.get().await.context("checkout connection")?;
    drop(conn);
    Ok(())
}

/// Mask credentials in a connection string before it reaches the logs.
pub fn mask_connection_string(url: &str) -> String {
    match url.split_once("://") {
        Some((scheme, rest)) => match rest.rsplit_once('@') {
            Some((_credentials, host)) => format!("{}://***:***@{}", scheme, host),
            None => format!("{}://{}", scheme, rest),
        },
        None => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_connection_string() {
        assert_eq!(
            mask_connection_string("postgresql://user:secret@db:5432/lumina"),
            "postgresql://***:***@db:5432/lumina"
        );
        assert_eq!(
            mask_connection_string("postgresql://db:5432/lumina"),
            "postgresql://db:5432/lumina"
        );
        assert_eq!(mask_connection_string("garbage"), "***");
    }
}
