//! Persistence layer: the three tables behind a transactional interface
//! (`factorial_calculations`, `factorial_max_request_numbers`,
//! `factorial_current_calculated_numbers`).
//!
//! Connection pooling is `deadpool-postgres` over `tokio-postgres`, schema
//! migrations are embedded `refinery` SQL files run once at startup.

use async_trait::async_trait;
use deadpool_postgres::{Config as PoolConfig, CreatePoolError, Pool, Runtime};
use factorial_types::{CalculationRecord, CalculationStatus};
use tokio_postgres::NoTls;

mod migrations {
    refinery::embed_migrations!("migrations");
}

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("failed to build database pool: {0}")]
    PoolBuild(#[from] CreatePoolError),
    #[error("database query error: {0}")]
    Query(#[from] tokio_postgres::Error),
    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),
    #[error("row not found for number {0}")]
    NotFound(u64),
    #[error("invalid status value in database: {0}")]
    InvalidStatus(String),
}

/// Connection parameters for the Postgres pool. Deliberately free of any
/// dependency on the service's configuration crate: the binaries that wire
/// this crate up copy the handful of fields they need out of their own
/// config struct.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
}

/// Builds a connection pool and runs embedded migrations against it.
pub async fn connect(settings: &DbSettings) -> Result<Pool, DbError> {
    let mut cfg = PoolConfig::new();
    cfg.host = Some(settings.host.clone());
    cfg.port = Some(settings.port);
    cfg.user = Some(settings.user.clone());
    cfg.password = Some(settings.password.clone());
    cfg.dbname = Some(settings.dbname.clone());
    let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;

    {
        let mut client = pool.get().await?;
        let report = migrations::migrations::runner()
            .run_async(&mut **client)
            .await?;
        log::info!(
            "applied {} database migration(s)",
            report.applied_migrations().len()
        );
    }

    Ok(pool)
}

fn row_to_record(row: &tokio_postgres::Row) -> Result<CalculationRecord, DbError> {
    let status_str: String = row.try_get("status")?;
    let status: CalculationStatus = status_str
        .parse()
        .map_err(DbError::InvalidStatus)?;
    let number: i64 = row.try_get("number")?;
    Ok(CalculationRecord {
        id: row.try_get("id")?,
        number: number as u64,
        status,
        artifact_key: row.try_get("artifact_key")?,
        checksum: row.try_get("checksum")?,
        size: row.try_get("size")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
pub trait CalculationRepository: Send + Sync {
    /// Inserts a row in `calculating`. A no-op (success) if a row for
    /// `number` already exists.
    async fn create(&self, number: u64) -> Result<(), DbError>;
    async fn find(&self, number: u64) -> Result<Option<CalculationRecord>, DbError>;
    /// Single-column status update. Returns `NotFound` if no row matches.
    async fn set_status(&self, number: u64, status: CalculationStatus) -> Result<(), DbError>;
}

#[async_trait]
pub trait MaxRequestRepository: Send + Sync {
    async fn get(&self) -> Result<u64, DbError>;
    /// `UPDATE ... SET max_number = n WHERE max_number < n`, as a single
    /// conditional statement. Returns `true` iff the row was updated.
    async fn set_if_greater(&self, n: u64) -> Result<bool, DbError>;
}

#[async_trait]
pub trait FrontierRepository: Send + Sync {
    /// The current `next_number`, or 0 if no row exists yet.
    async fn get(&self) -> Result<u64, DbError>;
}

/// Everything the pipeline needs from the persistence layer, bundled behind
/// one trait object so the sweep algorithm can be exercised against an
/// in-memory double instead of a live Postgres instance.
#[async_trait]
pub trait PipelineStore:
    CalculationRepository + MaxRequestRepository + FrontierRepository + Send + Sync
{
    /// Atomically marks `number` as `done` with its artifact metadata, and
    /// advances the frontier to `new_frontier`. Both writes commit or
    /// neither does.
    async fn finalize_done(
        &self,
        number: u64,
        artifact_key: &str,
        checksum: &str,
        size: i64,
        new_frontier: u64,
    ) -> Result<(), DbError>;
}

/// The sole writer of calculation, artifact-metadata, and frontier rows.
/// Holds the connection pool backing all three repository traits, plus the
/// one genuinely cross-table operation: `finalize_done`.
#[derive(Clone)]
pub struct Persistence {
    pool: Pool,
}

impl Persistence {
    pub fn new(pool: Pool) -> Self {
        Persistence { pool }
    }

    /// Cheap liveness check for the `/ready` endpoint.
    pub async fn ping(&self) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client.execute("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Atomically marks `number` as `done` with its artifact metadata, and
    /// advances the frontier to `new_frontier`. Both writes commit or
    /// neither does.
    pub async fn finalize_done(
        &self,
        number: u64,
        artifact_key: &str,
        checksum: &str,
        size: i64,
        new_frontier: u64,
    ) -> Result<(), DbError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let rows = tx
            .execute(
                "UPDATE factorial_calculations
                 SET status = 'done', artifact_key = $1, checksum = $2, size = $3, updated_at = now()
                 WHERE number = $4",
                &[&artifact_key, &checksum, &size, &(number as i64)],
            )
            .await?;
        if rows == 0 {
            return Err(DbError::NotFound(number));
        }

        let updated = tx
            .execute(
                "UPDATE factorial_current_calculated_numbers
                 SET next_number = $1, updated_at = now()
                 WHERE next_number < $1",
                &[&(new_frontier as i64)],
            )
            .await?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO factorial_current_calculated_numbers (next_number)
                 SELECT $1 WHERE NOT EXISTS (SELECT 1 FROM factorial_current_calculated_numbers)",
                &[&(new_frontier as i64)],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CalculationRepository for Persistence {
    async fn create(&self, number: u64) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO factorial_calculations (number, status)
                 VALUES ($1, 'calculating')
                 ON CONFLICT (number) DO NOTHING",
                &[&(number as i64)],
            )
            .await?;
        Ok(())
    }

    async fn find(&self, number: u64) -> Result<Option<CalculationRecord>, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT id, number, status, artifact_key, checksum, size, created_at, updated_at
                 FROM factorial_calculations WHERE number = $1",
                &[&(number as i64)],
            )
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn set_status(&self, number: u64, status: CalculationStatus) -> Result<(), DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .execute(
                "UPDATE factorial_calculations SET status = $1, updated_at = now() WHERE number = $2",
                &[&status.as_str(), &(number as i64)],
            )
            .await?;
        if rows == 0 {
            return Err(DbError::NotFound(number));
        }
        Ok(())
    }
}

#[async_trait]
impl MaxRequestRepository for Persistence {
    async fn get(&self) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT max_number FROM factorial_max_request_numbers ORDER BY id DESC LIMIT 1",
                &[],
            )
            .await?;
        match row {
            Some(row) => {
                let n: i64 = row.try_get("max_number")?;
                Ok(n as u64)
            }
            None => Ok(0),
        }
    }

    async fn set_if_greater(&self, n: u64) -> Result<bool, DbError> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let rows = tx
            .execute(
                "UPDATE factorial_max_request_numbers
                 SET max_number = $1, updated_at = now()
                 WHERE max_number < $1",
                &[&(n as i64)],
            )
            .await?;

        let changed = if rows > 0 {
            true
        } else {
            let inserted = tx
                .execute(
                    "INSERT INTO factorial_max_request_numbers (max_number)
                     SELECT $1 WHERE NOT EXISTS (SELECT 1 FROM factorial_max_request_numbers)",
                    &[&(n as i64)],
                )
                .await?;
            inserted > 0
        };

        tx.commit().await?;
        Ok(changed)
    }
}

#[async_trait]
impl FrontierRepository for Persistence {
    async fn get(&self) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                "SELECT next_number FROM factorial_current_calculated_numbers ORDER BY id DESC LIMIT 1",
                &[],
            )
            .await?;
        match row {
            Some(row) => {
                let n: i64 = row.try_get("next_number")?;
                Ok(n as u64)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl PipelineStore for Persistence {
    async fn finalize_done(
        &self,
        number: u64,
        artifact_key: &str,
        checksum: &str,
        size: i64,
        new_frontier: u64,
    ) -> Result<(), DbError> {
        Persistence::finalize_done(self, number, artifact_key, checksum, size, new_frontier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_parsing_rejects_unknown_status() {
        let err = DbError::InvalidStatus("bogus".to_string());
        assert_eq!(err.to_string(), "invalid status value in database: bogus");
    }
}
