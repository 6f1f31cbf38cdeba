use crate::config::AppConfig;
use crate::errors::ServiceError;
use metrics::{counter, gauge, histogram};
use sea_orm::{
    ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, DbBackend, TransactionTrait,
};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, error, info};

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            max_connections: cfg.db_max_connections,
            min_connections: cfg.db_min_connections,
            connect_timeout: Duration::from_secs(cfg.db_connect_timeout_secs),
            idle_timeout: Duration::from_secs(cfg.db_idle_timeout_secs),
            acquire_timeout: Duration::from_secs(cfg.db_acquire_timeout_secs),
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("dealership_db.max_connections", config.max_connections as f64);

    let db_pool = Database::connect(opt).await.map_err(|e| {
        error!(error = %e, "Database connection establishment failed");
        ServiceError::DatabaseError(e)
    })?;

    info!(
        max_connections = config.max_connections,
        "Database connection pool established"
    );
    Ok(db_pool)
}

/// Establish DB pool using AppConfig tuning
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    let db_cfg: DbConfig = cfg.into();
    establish_connection_with_config(&db_cfg).await
}

/// Opens a transaction and records it in the transaction counters.
///
/// Dropping the returned transaction without committing rolls it back.
pub async fn begin(pool: &DbPool, operation: &'static str) -> Result<DatabaseTransaction, ServiceError> {
    let txn = pool.begin().await.map_err(|e| {
        error!(operation, error = %e, "Failed to start transaction");
        counter!("dealership_db.transaction.begin_failed", 1, "operation" => operation);
        ServiceError::DatabaseError(e)
    })?;
    counter!("dealership_db.transaction.started", 1, "operation" => operation);
    Ok(txn)
}

/// Commits a transaction opened with [`begin`].
pub async fn commit(txn: DatabaseTransaction, operation: &'static str) -> Result<(), ServiceError> {
    txn.commit().await.map_err(|e| {
        error!(operation, error = %e, "Failed to commit transaction");
        counter!("dealership_db.transaction.rolled_back", 1, "operation" => operation);
        ServiceError::DatabaseError(e)
    })?;
    counter!("dealership_db.transaction.committed", 1, "operation" => operation);
    Ok(())
}

/// Serializes write transactions on backends that allow a single writer.
///
/// A deferred SQLite transaction that has already read cannot wait for the
/// writer lock: the upgrade fails with `SQLITE_BUSY` at once. Holding the
/// gate for the whole transaction keeps in-process writers from overlapping.
/// Postgres locks rows itself, so the gate stays open there.
#[derive(Debug, Clone)]
pub struct WriteGate {
    permits: Option<Arc<Semaphore>>,
}

impl WriteGate {
    pub fn for_backend(backend: DbBackend) -> Self {
        let permits = matches!(backend, DbBackend::Sqlite).then(|| Arc::new(Semaphore::new(1)));
        Self { permits }
    }

    /// Waits for the writer slot. Hold the returned permit until the
    /// transaction has committed or been dropped.
    pub async fn enter(
        &self,
        operation: &'static str,
    ) -> Result<Option<SemaphorePermit<'_>>, ServiceError> {
        let Some(permits) = &self.permits else {
            return Ok(None);
        };

        let start = Instant::now();
        let permit = permits.acquire().await.map_err(|e| {
            error!(operation, error = %e, "Write gate closed");
            ServiceError::InternalError(format!("Write gate closed: {}", e))
        })?;
        histogram!(
            "dealership_db.write_gate.wait_seconds",
            start.elapsed().as_secs_f64(),
            "operation" => operation
        );
        Ok(Some(permit))
    }
}

/// Runs database migrations
///
/// # Errors
/// Returns a `ServiceError` if migrations fail to execute
pub async fn run_migrations(pool: &DbPool) -> Result<(), ServiceError> {
    info!("Running database migrations");
    let start = Instant::now();

    let result = crate::migrator::Migrator::up(pool, None)
        .await
        .map_err(|e| ServiceError::MigrationError(e.to_string()));

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => info!("Database migrations completed successfully in {:?}", elapsed),
        Err(e) => error!("Database migrations failed after {:?}: {}", elapsed, e),
    }

    result
}

/// Checks if the database connection is active
pub async fn check_connection(pool: &DbPool) -> Result<(), ServiceError> {
    let start = Instant::now();
    let result = pool.ping().await.map_err(ServiceError::DatabaseError);

    let elapsed = start.elapsed();
    match &result {
        Ok(_) => {
            debug!("Database connection check successful in {:?}", elapsed);
            gauge!("dealership_db.connection_latency", elapsed.as_millis() as f64);
        }
        Err(e) => {
            error!("Database connection check failed after {:?}: {}", elapsed, e);
            counter!("dealership_db.connection_failures", 1);
        }
    }

    result
}

/// Closes the database connection pool
pub async fn close_pool(pool: DbPool) -> Result<(), ServiceError> {
    info!("Closing database connection pool");
    pool.close().await.map_err(ServiceError::DatabaseError)
}
