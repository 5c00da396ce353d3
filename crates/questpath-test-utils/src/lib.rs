//! Shared test utilities for questpath integration tests.
//!
//! Every test gets its own freshly migrated database inside one PostgreSQL
//! server shared by the whole test binary.
//!
//! - **`QUESTPATH_TEST_PG_URL`** set: use that server directly (CI starts one
//!   up front).
//! - Unset: start a container through testcontainers on first use and keep
//!   it alive in a `OnceCell` until the binary exits.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::ContainerAsync;
use testcontainers::ImageExt;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use questpath_db::models::User;
use questpath_db::pool;
use questpath_db::queries::users;

struct SharedServer {
    base_url: String,
    /// Keeps the container running. `None` for an external server.
    _container: Option<ContainerAsync<Postgres>>,
}

static SHARED_SERVER: OnceCell<SharedServer> = OnceCell::const_new();

async fn start_server() -> SharedServer {
    if let Ok(url) = std::env::var("QUESTPATH_TEST_PG_URL") {
        return SharedServer {
            base_url: url.trim_end_matches('/').to_owned(),
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("failed to get mapped port");

    SharedServer {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

async fn base_url() -> &'static str {
    &SHARED_SERVER.get_or_init(start_server).await.base_url
}

async fn maintenance_pool() -> PgPool {
    let url = format!("{}/postgres", base_url().await);
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&url)
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely named database that lives for one test.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    /// Create and migrate a fresh database.
    pub async fn new() -> Self {
        let name = format!("questpath_test_{}", Uuid::new_v4().simple());

        let maint = maintenance_pool().await;
        maint
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create test database {name}: {e}"));
        maint.close().await;

        let url = format!("{}/{name}", base_url().await);
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to test database {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should succeed");

        Self { pool, name }
    }

    /// Close the pool and drop the database.
    ///
    /// Open connections from other pools are terminated first.
    pub async fn teardown(self) {
        self.pool.close().await;

        let maint = maintenance_pool().await;
        let terminate = format!(
            "SELECT pg_terminate_backend(pid) \
             FROM pg_stat_activity \
             WHERE datname = '{}' AND pid <> pg_backend_pid()",
            self.name
        );
        let _ = maint.execute(terminate.as_str()).await;
        let _ = maint
            .execute(format!("DROP DATABASE IF EXISTS {}", self.name).as_str())
            .await;
        maint.close().await;
    }
}

/// Insert a free user with a unique email.
pub async fn seed_user(pool: &PgPool) -> User {
    let email = format!("user-{}@example.test", Uuid::new_v4().simple());
    users::insert_user(pool, &email)
        .await
        .expect("insert_user should succeed")
}

/// Insert a user and assign the given entitlement.
pub async fn seed_user_with_entitlement(
    pool: &PgPool,
    is_premium: bool,
    premium_expiry: Option<DateTime<Utc>>,
) -> User {
    let user = seed_user(pool).await;
    users::set_entitlement(pool, user.id, is_premium, premium_expiry)
        .await
        .expect("set_entitlement should succeed")
        .expect("seeded user should exist")
}

/// Insert a user with an explicit id (the billing provider refers to users
/// by id).
pub async fn seed_user_with_id(pool: &PgPool, id: i64, email: &str) -> User {
    sqlx::query_as::<_, User>("INSERT INTO users (id, email) VALUES ($1, $2) RETURNING *")
        .bind(id)
        .bind(email)
        .fetch_one(pool)
        .await
        .unwrap_or_else(|e| panic!("failed to insert user {id}: {e}"))
}
