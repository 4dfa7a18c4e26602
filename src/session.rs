//! Session of a store operation: its logical cache and transaction.
use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::traits::Connection;
use crate::types::Transaction;

/// Per-operation context handed to the store by the cache engine.
///
/// It names the logical cache the operation belongs to and, for transactional operations, the transaction. The
/// connection pinned to the transaction lives here too: the caller owns the session for the duration of the
/// transaction and the store binds/unbinds the connection through it.
pub struct StoreSession {
    cache_name:  Option<String>,
    transaction: Option<Transaction>,
    connection:  Mutex<Option<Arc<dyn Connection>>>,
}

impl StoreSession {
    /// Session of a non-transactional operation.
    pub fn new(cache_name: Option<&str>) -> Self {
        Self {
            cache_name:  cache_name.map(str::to_string),
            transaction: None,
            connection:  Mutex::new(None),
        }
    }

    pub fn with_transaction(cache_name: Option<&str>, transaction: Transaction) -> Self {
        Self {
            cache_name:  cache_name.map(str::to_string),
            transaction: Some(transaction),
            connection:  Mutex::new(None),
        }
    }

    pub fn cache_name(&self) -> Option<&str> {
        self.cache_name.as_deref()
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// The connection currently pinned to the transaction, if any.
    pub async fn bound_connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.lock().await.clone()
    }

    /// Return the bound connection or bind the one produced by `open`.
    pub(crate) async fn bind_with<F, Fut, E>(&self, open: F) -> Result<Arc<dyn Connection>, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Arc<dyn Connection>, E>>,
    {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(Arc::clone(conn));
        }
        let conn = open().await?;
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    pub(crate) async fn unbind(&self) -> Option<Arc<dyn Connection>> {
        self.connection.lock().await.take()
    }
}

impl Debug for StoreSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSession")
            .field("cache_name", &self.cache_name)
            .field("transaction", &self.transaction)
            .finish()
    }
}
