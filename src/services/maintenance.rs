// Background maintenance
// Expired sessions and refresh tokens stop validating on their own; these
// sweeps just keep the tables from growing without bound.

use std::time::Duration;

use tracing::{info, warn};

use crate::db::DieselPool;
use crate::models::refresh_token::RefreshToken;
use crate::models::session::Session;

/// Spawn the periodic cleanup loop. Runs until the process exits.
pub fn spawn_cleanup_task(db_pool: DieselPool, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The immediate first tick would race startup migrations.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match run_cleanup(&db_pool).await {
                Ok((sessions, tokens)) => {
                    if sessions > 0 || tokens > 0 {
                        info!(sessions, tokens, "cleaned up expired auth state");
                    }
                },
                Err(e) => warn!("auth state cleanup failed: {}", e),
            }
        }
    });
}

async fn run_cleanup(db_pool: &DieselPool) -> Result<(usize, usize), String> {
    let mut conn = db_pool.get().await.map_err(|e| e.to_string())?;

    let sessions = Session::cleanup_expired(&mut conn)
        .await
        .map_err(|e| e.to_string())?;
    let tokens = RefreshToken::cleanup_expired(&mut conn)
        .await
        .map_err(|e| e.to_string())?;

    Ok((sessions, tokens))
}
