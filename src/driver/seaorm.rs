use async_trait::async_trait;
use sea_orm::ConnectOptions;
use sea_orm::ConnectionTrait;
use sea_orm::Database;
use sea_orm::DatabaseBackend;
use sea_orm::DatabaseConnection;
use sea_orm::DatabaseTransaction;
use sea_orm::QueryResult;
use sea_orm::Statement;
use sea_orm::TransactionTrait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::warn;

use super::url_with_credentials;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::error::StoreError;
use crate::traits::Connection;
use crate::traits::ConnectionProvider;
use crate::types::ColumnSpec;
use crate::types::DbType;
use crate::types::Row;
use crate::types::Value;

/// Product name as reported for dialect resolution.
pub fn product_name(backend: DatabaseBackend) -> &'static str {
    #[allow(unreachable_patterns)]
    match backend {
        DatabaseBackend::MySql => "MySQL",
        DatabaseBackend::Postgres => "PostgreSQL",
        DatabaseBackend::Sqlite => "SQLite",
        _ => "Unknown",
    }
}

enum Handle {
    /// Autocommit: every statement goes to the pool.
    Pooled(DatabaseConnection),
    /// Open transaction; `None` once committed or rolled back.
    Transaction(Mutex<Option<DatabaseTransaction>>),
}

pub struct SeaOrmConnection {
    backend: DatabaseBackend,
    handle:  Handle,
}

impl SeaOrmConnection {
    pub fn autocommit(db: DatabaseConnection) -> Self {
        Self {
            backend: db.get_database_backend(),
            handle:  Handle::Pooled(db),
        }
    }

    pub async fn begin(db: &DatabaseConnection) -> Result<Self> {
        Ok(Self {
            backend: db.get_database_backend(),
            handle:  Handle::Transaction(Mutex::new(Some(db.begin().await?))),
        })
    }

    fn statement(&self, sql: &str, params: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(self.backend, sql, params)
    }

    async fn query_all(&self, stmt: Statement) -> Result<Vec<QueryResult>> {
        Ok(match &self.handle {
            Handle::Pooled(db) => db.query_all(stmt).await?,
            Handle::Transaction(tx) => {
                let guard = tx.lock().await;
                guard.as_ref().ok_or(StoreError::ConnectionClosed)?.query_all(stmt).await?
            }
        })
    }

    async fn execute_one(&self, stmt: Statement) -> Result<u64> {
        Ok(match &self.handle {
            Handle::Pooled(db) => db.execute(stmt).await?.rows_affected(),
            Handle::Transaction(tx) => {
                let guard = tx.lock().await;
                guard
                    .as_ref()
                    .ok_or(StoreError::ConnectionClosed)?
                    .execute(stmt)
                    .await?
                    .rows_affected()
            }
        })
    }

    async fn take_transaction(&self) -> Option<DatabaseTransaction> {
        match &self.handle {
            Handle::Pooled(_) => None,
            Handle::Transaction(tx) => tx.lock().await.take(),
        }
    }
}

fn decode_row(row: &QueryResult, columns: &[ColumnSpec]) -> Result<Row> {
    let mut decoded = Row::default();
    for column in columns {
        let name = column.name.as_str();
        let value = match column.db_type {
            DbType::Boolean => Value::from(row.try_get::<Option<bool>>("", name)?),
            DbType::SmallInt => Value::from(row.try_get::<Option<i16>>("", name)?),
            DbType::Integer => Value::from(row.try_get::<Option<i32>>("", name)?),
            DbType::BigInt => Value::from(row.try_get::<Option<i64>>("", name)?),
            DbType::Real => Value::from(row.try_get::<Option<f32>>("", name)?),
            DbType::Double => Value::from(row.try_get::<Option<f64>>("", name)?),
            DbType::Text => Value::from(row.try_get::<Option<String>>("", name)?),
            DbType::Binary => Value::from(row.try_get::<Option<Vec<u8>>>("", name)?),
        };
        decoded.push(name, value);
    }
    Ok(decoded)
}

#[async_trait]
impl Connection for SeaOrmConnection {
    fn is_autocommit(&self) -> bool {
        matches!(self.handle, Handle::Pooled(_))
    }

    async fn product_name(&self) -> Result<String> {
        Ok(product_name(self.backend).to_string())
    }

    async fn query(&self, sql: &str, params: Vec<Value>, columns: &[ColumnSpec]) -> Result<Vec<Row>> {
        self.query_all(self.statement(sql, params))
            .await?
            .iter()
            .map(|row| decode_row(row, columns))
            .collect()
    }

    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        self.execute_one(self.statement(sql, params)).await
    }

    // sea-orm has no batch API; the parameter sets go one by one over the same connection.
    async fn execute_batch(&self, sql: &str, batch: Vec<Vec<Value>>) -> Result<Vec<u64>> {
        let mut affected = Vec::with_capacity(batch.len());
        for params in batch {
            affected.push(self.execute_one(self.statement(sql, params)).await?);
        }
        Ok(affected)
    }

    async fn commit(&self) -> Result<()> {
        if let Some(tx) = self.take_transaction().await {
            tx.commit().await?;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if let Some(tx) = self.take_transaction().await {
            tx.rollback().await?;
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(tx) = self.take_transaction().await {
            debug!("Closing connection with an open transaction, rolling back");
            if let Err(err) = tx.rollback().await {
                warn!("Failed to roll back on close: {err}");
            }
        }
    }
}

impl Debug for SeaOrmConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeaOrmConnection")
            .field("backend", &product_name(self.backend))
            .field("autocommit", &self.is_autocommit())
            .finish()
    }
}

/// Connection source over a sea-orm connection pool.
///
/// Either wraps an existing pool or connects lazily, on the first request, to the configured URL.
pub struct SeaOrmProvider {
    options: Option<ConnectOptions>,
    db:      OnceCell<DatabaseConnection>,
}

impl SeaOrmProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            options: None,
            db:      OnceCell::new_with(Some(db)),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let url = config
            .connection_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or(StoreError::NoConnectionSource)?;

        let max_connections = config
            .max_pool_size
            .checked_add(1)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| StoreError::InvalidConfig(format!("max_pool_size {} is too big", config.max_pool_size)))?;

        let mut options = ConnectOptions::new(url_with_credentials(
            url,
            config.user.as_deref(),
            config.password.as_deref(),
        ));
        options
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        Ok(Self {
            options: Some(options),
            db:      OnceCell::new(),
        })
    }

    pub async fn database(&self) -> Result<&DatabaseConnection> {
        self.db
            .get_or_try_init(|| async {
                let options = self
                    .options
                    .clone()
                    .ok_or_else(|| StoreError::Internal("no connection options".to_string()))?;
                debug!("Connecting to database");
                Ok(Database::connect(options).await?)
            })
            .await
    }
}

#[async_trait]
impl ConnectionProvider for SeaOrmProvider {
    async fn open_connection(&self, autocommit: bool) -> Result<Arc<dyn Connection>> {
        let db = self.database().await?;
        Ok(if autocommit {
            Arc::new(SeaOrmConnection::autocommit(db.clone()))
        }
        else {
            Arc::new(SeaOrmConnection::begin(db).await?)
        })
    }
}

impl Debug for SeaOrmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeaOrmProvider")
            .field("connected", &self.db.initialized())
            .finish()
    }
}
