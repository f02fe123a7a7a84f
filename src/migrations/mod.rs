// Embedded migration runner
// Migrations are compiled into the binary so containers need no external
// migration tooling. diesel_migrations requires a sync connection, so the
// harness runs on the blocking pool.

use diesel::{Connection, PgConnection};
use diesel_migrations::MigrationHarness;
use std::error::Error;
use tracing::info;

use crate::db::diesel_pool::MIGRATIONS;

/// Whether the embedded runner should execute at startup.
pub fn should_run_migrations() -> bool {
    !crate::app_config::config().disable_embedded_migrations
}

/// Run all pending migrations. Returns the number applied.
pub async fn run_migrations() -> Result<usize, Box<dyn Error + Send + Sync>> {
    let database_url = crate::app_config::config().database.url.clone();

    let applied =
        tokio::task::spawn_blocking(move || -> Result<usize, Box<dyn Error + Send + Sync>> {
            let mut conn = PgConnection::establish(&database_url)
                .map_err(|e| format!("establish migration connection: {}", e))?;

            let pending = conn
                .pending_migrations(MIGRATIONS)
                .map_err(|e| format!("list pending migrations: {}", e))?;

            if pending.is_empty() {
                return Ok(0);
            }

            let applied = conn
                .run_pending_migrations(MIGRATIONS)
                .map_err(|e| format!("run migrations: {}", e))?;

            Ok(applied.len())
        })
        .await??;

    info!("applied {} pending migrations", applied);
    Ok(applied)
}
