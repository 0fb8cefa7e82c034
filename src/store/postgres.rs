use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use time::OffsetDateTime;
use tokio_postgres::{NoTls, Row};

use crate::{
    config::PostgresStoreConfig,
    store::{
        error::{
            StoreError, classify_sqlstate, connection_error, invariant_violation, query_error,
        },
        ports::{ClaimTransaction, ReservationStore},
    },
    types::{
        ActorId, ClaimRecord, ClaimStatus, IsolationLevel, Resource, ResourceId, TEST_LAB_ID,
    },
};

const SCHEMA_SQL: &str = include_str!("../../sql/schema.sql");

const ACTIVE_CLAIM_FILTER: &str =
    "status_id IN (1, 2, 3) AND ends_at > NOW()";

/// PostgreSQL backend. Each claim transaction checks out its own pooled
/// connection and drives `BEGIN ISOLATION LEVEL ...` / `COMMIT` on it.
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub async fn connect(config: &PostgresStoreConfig) -> Result<Self, StoreError> {
        let mut settings = PoolSettings::new();
        settings.host = Some(config.host.clone());
        settings.port = Some(config.port);
        settings.user = Some(config.user.clone());
        settings.password = Some(config.password.clone());
        settings.dbname = Some(config.dbname.clone());
        settings.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        settings.pool = Some(PoolConfig::new(config.max_connections.max(1)));

        let pool = settings
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|err| connection_error(format!("failed to create connection pool: {err}")))?;
        let store = Self { pool };
        store.ping().await?;

        tracing::info!(
            target: "store",
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            max_connections = config.max_connections,
            "postgres_pool_ready"
        );
        Ok(store)
    }

    /// Creates missing tables and seeds empty ones.
    pub async fn bootstrap(
        &self,
        seed_actors: usize,
        seed_resources: usize,
    ) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .map_err(map_pg_error)?;

        let actor_rows: i64 = client
            .query_one("SELECT COUNT(*) FROM actors", &[])
            .await
            .map_err(map_pg_error)?
            .get(0);
        if actor_rows == 0 && seed_actors > 0 {
            client
                .execute(
                    "INSERT INTO actors (actor_id, display_name)
                     SELECT g, 'actor-' || g FROM generate_series(1, $1::BIGINT) AS g",
                    &[&(seed_actors as i64)],
                )
                .await
                .map_err(map_pg_error)?;
        }

        let resource_rows: i64 = client
            .query_one("SELECT COUNT(*) FROM resources", &[])
            .await
            .map_err(map_pg_error)?
            .get(0);
        if resource_rows == 0 && seed_resources > 0 {
            client
                .execute(
                    "INSERT INTO resources (resource_id, code, available)
                     SELECT g, 'R-' || lpad(g::TEXT, 3, '0'), TRUE
                     FROM generate_series(1, $1::BIGINT) AS g",
                    &[&(seed_resources as i64)],
                )
                .await
                .map_err(map_pg_error)?;
        }

        tracing::info!(
            target: "store",
            existing_actors = actor_rows,
            existing_resources = resource_rows,
            "postgres_schema_bootstrapped"
        );
        Ok(())
    }

    async fn client(&self) -> Result<Object, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|err| connection_error(format!("failed to acquire connection: {err}")))
    }
}

fn map_pg_error(err: tokio_postgres::Error) -> StoreError {
    if let Some(db_error) = err.as_db_error() {
        return classify_sqlstate(db_error.code().code(), db_error.message().to_string());
    }
    if err.is_closed() {
        return connection_error(format!("connection closed: {err}"));
    }
    query_error(err.to_string())
}

fn timestamp(row: &Row, index: usize) -> Result<OffsetDateTime, StoreError> {
    let seconds: i64 = row.try_get(index).map_err(map_pg_error)?;
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|err| query_error(format!("claim timestamp out of range: {err}")))
}

fn claim_from_row(row: &Row) -> Result<ClaimRecord, StoreError> {
    let status_code: i32 = row.try_get(4).map_err(map_pg_error)?;
    let status = ClaimStatus::from_code(status_code)
        .ok_or_else(|| query_error(format!("unknown claim status code {status_code}")))?;
    Ok(ClaimRecord {
        id: row.try_get(0).map_err(map_pg_error)?,
        actor_id: row.try_get(1).map_err(map_pg_error)?,
        resource_id: row.try_get(2).map_err(map_pg_error)?,
        lab_id: row.try_get(3).map_err(map_pg_error)?,
        status,
        requested_at: timestamp(row, 5)?,
        starts_at: timestamp(row, 6)?,
        ends_at: timestamp(row, 7)?,
    })
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client
            .query_one("SELECT 1", &[])
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn count_resources(&self) -> Result<usize, StoreError> {
        let client = self.client().await?;
        let count: i64 = client
            .query_one("SELECT COUNT(*) FROM resources", &[])
            .await
            .map_err(map_pg_error)?
            .get(0);
        Ok(count.max(0) as usize)
    }

    async fn eligible_actors(&self) -> Result<Vec<ActorId>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT actor_id FROM actors ORDER BY actor_id", &[])
            .await
            .map_err(map_pg_error)?;
        rows.iter()
            .map(|row| row.try_get(0).map_err(map_pg_error))
            .collect()
    }

    async fn list_available_resources(&self) -> Result<Vec<Resource>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT resource_id, code FROM resources WHERE available = TRUE ORDER BY resource_id",
                &[],
            )
            .await
            .map_err(map_pg_error)?;
        rows.iter()
            .map(|row| {
                Ok(Resource {
                    id: row.try_get(0).map_err(map_pg_error)?,
                    code: row.try_get(1).map_err(map_pg_error)?,
                    available: true,
                })
            })
            .collect()
    }

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn ClaimTransaction>, StoreError> {
        let client = self.client().await?;
        client
            .batch_execute(&format!("BEGIN ISOLATION LEVEL {}", isolation.as_sql()))
            .await
            .map_err(map_pg_error)?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }

    async fn active_claims(&self) -> Result<Vec<ClaimRecord>, StoreError> {
        let client = self.client().await?;
        let sql = format!(
            "SELECT claim_id, actor_id, resource_id, lab_id, status_id,
                    EXTRACT(EPOCH FROM requested_at)::BIGINT,
                    EXTRACT(EPOCH FROM starts_at)::BIGINT,
                    EXTRACT(EPOCH FROM ends_at)::BIGINT
             FROM claims WHERE {ACTIVE_CLAIM_FILTER} ORDER BY claim_id"
        );
        let rows = client.query(sql.as_str(), &[]).await.map_err(map_pg_error)?;
        rows.iter().map(claim_from_row).collect()
    }

    async fn reset_all_resources_and_purge_test_claims(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        // One simple-query message runs as a single implicit transaction.
        client
            .batch_execute(&format!(
                "UPDATE resources SET available = TRUE; DELETE FROM claims WHERE lab_id = {TEST_LAB_ID};"
            ))
            .await
            .map_err(map_pg_error)
    }
}

struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> Result<&Object, StoreError> {
        self.client
            .as_ref()
            .ok_or_else(|| invariant_violation("transaction already finished"))
    }

    async fn finish(&mut self, statement: &str) -> Result<(), StoreError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| invariant_violation("transaction already finished"))?;
        client.batch_execute(statement).await.map_err(map_pg_error)
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = client.batch_execute("ROLLBACK").await {
                        tracing::warn!(target: "store", error = %err, "abandoned_transaction_rollback_failed");
                    }
                });
            }
            Err(_) => {
                // Detach so the pool never hands out a connection mid-transaction.
                drop(Object::take(client));
            }
        }
    }
}

#[async_trait]
impl ClaimTransaction for PgTransaction {
    async fn has_active_claim(&mut self, actor_id: ActorId) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM claims WHERE actor_id = $1 AND {ACTIVE_CLAIM_FILTER})"
        );
        let row = self
            .client()?
            .query_one(sql.as_str(), &[&actor_id])
            .await
            .map_err(map_pg_error)?;
        row.try_get(0).map_err(map_pg_error)
    }

    async fn lock_resource_if_available(
        &mut self,
        resource_id: ResourceId,
    ) -> Result<bool, StoreError> {
        let row = self
            .client()?
            .query_opt(
                "SELECT available FROM resources
                 WHERE resource_id = $1 AND available = TRUE
                 FOR UPDATE SKIP LOCKED",
                &[&resource_id],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(row.is_some())
    }

    async fn bind_resource_and_insert_claim(
        &mut self,
        actor_id: ActorId,
        resource_id: ResourceId,
    ) -> Result<(), StoreError> {
        let client = self.client()?;
        client
            .execute(
                "UPDATE resources SET available = FALSE WHERE resource_id = $1",
                &[&resource_id],
            )
            .await
            .map_err(map_pg_error)?;
        client
            .execute(
                "INSERT INTO claims
                 (actor_id, resource_id, lab_id, status_id, requested_at, starts_at, ends_at)
                 VALUES ($1, $2, $3, $4, NOW(), NOW() + INTERVAL '30 minutes',
                         NOW() + INTERVAL '2 hours 30 minutes')",
                &[
                    &actor_id,
                    &resource_id,
                    &TEST_LAB_ID,
                    &ClaimStatus::Confirmed.code(),
                ],
            )
            .await
            .map_err(map_pg_error)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("COMMIT").await
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StoreError> {
        self.finish("ROLLBACK").await
    }
}
