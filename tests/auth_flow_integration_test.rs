// Full auth flow against live stores
// Requires TEST_DATABASE_URL (Postgres) and TEST_REDIS_URL (Redis); each
// test skips cleanly when either is absent so the suite passes on machines
// without backing services.

use std::sync::Arc;
use std::time::Duration;

use diesel::{Connection, PgConnection};
use diesel_migrations::MigrationHarness;
use serial_test::serial;
use uuid::Uuid;

use lumina_backend::db::{diesel_pool::MIGRATIONS, DieselPool, RedisConfig, RedisPool};
use lumina_backend::services::{
    AccessTokenConfig, AccessTokenService, AuthError, AuthService, ClientInfo, RefreshTokenService,
    RegisterInput, SessionService, TokenBlacklist,
};

struct TestEnv {
    auth: AuthService,
}

async fn test_env() -> Option<TestEnv> {
    dotenv::dotenv().ok();

    let database_url = match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping: TEST_DATABASE_URL not set");
            return None;
        },
    };
    let redis_url = match std::env::var("TEST_REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping: TEST_REDIS_URL not set");
            return None;
        },
    };

    // Migrations need a sync connection.
    {
        let url = database_url.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = PgConnection::establish(&url).expect("connect for migrations");
            conn.run_pending_migrations(MIGRATIONS)
                .expect("run migrations");
        })
        .await
        .unwrap();
    }

    let manager = diesel_async::pooled_connection::AsyncDieselConnectionManager::<
        diesel_async::AsyncPgConnection,
    >::new(database_url);
    let db_pool: DieselPool = bb8::Pool::builder()
        .max_size(4)
        .build(manager)
        .await
        .expect("build db pool");

    let redis_pool = RedisPool::new(RedisConfig {
        redis_url,
        pool_size: 2,
        connection_timeout: Duration::from_secs(5),
        command_timeout: Duration::from_secs(5),
        retry_attempts: 2,
        retry_delay: Duration::from_millis(50),
    })
    .await
    .expect("build redis pool");

    let access_tokens = Arc::new(AccessTokenService::new(AccessTokenConfig::ephemeral(900)));
    let refresh_tokens = Arc::new(RefreshTokenService::new(db_pool.clone(), 3600));
    let sessions = Arc::new(SessionService::new(db_pool.clone(), redis_pool.clone()));
    let blacklist = Arc::new(TokenBlacklist::new(redis_pool.clone()));

    Some(TestEnv {
        auth: AuthService::new(
            db_pool,
            redis_pool,
            access_tokens,
            refresh_tokens,
            sessions,
            blacklist,
        ),
    })
}

fn unique_registration() -> RegisterInput {
    let suffix = Uuid::new_v4().simple().to_string();
    RegisterInput {
        email: format!("it-{}@example.com", &suffix[..12]),
        username: format!("it_{}", &suffix[..12]),
        password: "Str0ng!Passw0rd!".to_string(),
    }
}

fn client() -> ClientInfo {
    ClientInfo {
        ip_address: Some("203.0.113.50".to_string()),
        user_agent: Some("integration-test".to_string()),
    }
}

#[tokio::test]
#[serial]
async fn test_register_then_login() {
    let Some(env) = test_env().await else { return };

    let input = unique_registration();
    let (user, pair) = env.auth.register(input.clone(), client()).await.unwrap();
    assert_eq!(pair.token_type, "Bearer");
    assert_eq!(pair.expires_in, 900);

    // Login with email.
    let (logged_in, _) = env
        .auth
        .login(&input.email, &input.password, client())
        .await
        .unwrap();
    assert_eq!(logged_in.id, user.id);

    // Login with username.
    env.auth
        .login(&input.username, &input.password, client())
        .await
        .unwrap();

    // Wrong password converges on InvalidCredentials.
    let err = env
        .auth
        .login(&input.email, "Wrong!Password99", client())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    // Unknown identifier is indistinguishable.
    let err = env
        .auth
        .login("ghost@example.com", &input.password, client())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}

#[tokio::test]
#[serial]
async fn test_duplicate_registration_conflicts() {
    let Some(env) = test_env().await else { return };

    let input = unique_registration();
    env.auth.register(input.clone(), client()).await.unwrap();

    let err = env
        .auth
        .register(input.clone(), client())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::EmailAlreadyExists | AuthError::UsernameAlreadyExists
    ));
}

#[tokio::test]
#[serial]
async fn test_rotation_replay_revokes_family() {
    let Some(env) = test_env().await else { return };

    let input = unique_registration();
    let (_user, pair) = env.auth.register(input, client()).await.unwrap();
    let r0 = pair.refresh_token;

    // First rotation succeeds.
    let rotated = env.auth.refresh(&r0, client()).await.unwrap();
    let r1 = rotated.refresh_token;
    assert_ne!(r0, r1);

    // Replaying the consumed token trips the detector.
    let err = env.auth.refresh(&r0, client()).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenReplayDetected));

    // The replay revoked the whole family, including the fresh child.
    let err = env.auth.refresh(&r1, client()).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenRevoked));
}

#[tokio::test]
#[serial]
async fn test_logout_blacklists_access_token() {
    let Some(env) = test_env().await else { return };

    let input = unique_registration();
    let (_user, pair) = env.auth.register(input, client()).await.unwrap();

    // Valid before logout.
    env.auth.validate_token(&pair.access_token).await.unwrap();

    env.auth
        .logout(&pair.access_token, Some(&pair.refresh_token))
        .await
        .unwrap();

    // Signature and expiry are still fine; the blacklist or the dead
    // session rejects it anyway.
    let err = env.auth.validate_token(&pair.access_token).await.unwrap_err();
    assert!(matches!(
        err,
        AuthError::TokenBlacklisted | AuthError::SessionNotFound
    ));

    // Logout is idempotent.
    env.auth
        .logout(&pair.access_token, Some(&pair.refresh_token))
        .await
        .unwrap();

    // The revoked refresh token no longer rotates.
    let err = env.auth.refresh(&pair.refresh_token, client()).await.unwrap_err();
    assert!(matches!(err, AuthError::TokenRevoked));
}

#[tokio::test]
#[serial]
async fn test_logout_all_clears_every_session() {
    let Some(env) = test_env().await else { return };

    let input = unique_registration();
    let (user, first) = env.auth.register(input.clone(), client()).await.unwrap();
    let (_, second) = env
        .auth
        .login(&input.email, &input.password, client())
        .await
        .unwrap();

    assert_eq!(
        env.auth.sessions().get_user_sessions(user.id).await.unwrap().len(),
        2
    );

    env.auth.logout_all(user.id).await.unwrap();

    assert!(env
        .auth
        .sessions()
        .get_user_sessions(user.id)
        .await
        .unwrap()
        .is_empty());

    // Neither session's tokens survive.
    for pair in [first, second] {
        assert!(env.auth.validate_token(&pair.access_token).await.is_err());
        assert!(env.auth.refresh(&pair.refresh_token, client()).await.is_err());
    }
}

#[tokio::test]
#[serial]
async fn test_session_cache_eviction_falls_back_to_database() {
    let Some(env) = test_env().await else { return };

    let input = unique_registration();
    let (user, pair) = env.auth.register(input, client()).await.unwrap();

    // Evict the cache entry by hand; validation must repopulate from the
    // durable row instead of failing.
    let sessions = env.auth.sessions().get_user_sessions(user.id).await.unwrap();
    let session_id = sessions[0].id;

    let redis_url = std::env::var("TEST_REDIS_URL").unwrap();
    let redis_client = redis::Client::open(redis_url.as_str()).unwrap();
    let mut conn = redis_client.get_multiplexed_async_connection().await.unwrap();
    let _: () = redis::AsyncCommands::del(&mut conn, format!("auth:session:{}", session_id))
        .await
        .unwrap();

    env.auth.validate_token(&pair.access_token).await.unwrap();
}
