//! Writes and deletes, single and batched.
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tracing::instrument;
use tracing::trace;

use super::SqlCacheStore;
use crate::error::Result;
use crate::error::StoreError;
use crate::mapping::EntryMapping;
use crate::session::StoreSession;
use crate::traits::Connection;
use crate::traits::Marshaller;
use crate::types::Value;

/// Pending parameter sets of one statement.
#[derive(Debug)]
pub(crate) struct BatchStatement {
    sql:     String,
    pending: Vec<Vec<Value>>,
}

impl BatchStatement {
    pub(crate) fn new<S: Into<String>>(sql: S) -> Self {
        Self {
            sql:     sql.into(),
            pending: vec![],
        }
    }

    pub(crate) fn add(&mut self, params: Vec<Value>) -> usize {
        self.pending.push(params);
        self.pending.len()
    }

    pub(crate) async fn flush(&mut self, conn: &dyn Connection) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.pending);
        trace!("Executing batch of {} statements: {}", batch.len(), self.sql);
        conn.execute_batch(&self.sql, batch).await?;

        Ok(())
    }
}

/// Batches of one bulk operation by key type. Adding to a type other than the previous one flushes the previous
/// type's batch first.
struct Batches<Id> {
    batch_size: usize,
    statements: HashMap<Id, BatchStatement>,
    last:       Option<Id>,
}

impl<Id> Batches<Id>
where
    Id: std::hash::Hash + Eq + Clone,
{
    fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            statements: HashMap::new(),
            last: None,
        }
    }

    /// Switch to `key_id`, flushing the batch of the previous type if it differs.
    async fn switch_to(&mut self, key_id: &Id, conn: &dyn Connection) -> Result<()> {
        if let Some(last) = self.last.as_ref().filter(|last| *last != key_id) {
            if let Some(batch) = self.statements.get_mut(last) {
                batch.flush(conn).await?;
            }
        }
        self.last = Some(key_id.clone());
        Ok(())
    }

    async fn add(&mut self, key_id: &Id, sql: &str, params: Vec<Value>, conn: &dyn Connection) -> Result<()> {
        let batch = self
            .statements
            .entry(key_id.clone())
            .or_insert_with(|| BatchStatement::new(sql));

        if batch.add(params) >= self.batch_size {
            batch.flush(conn).await?;
        }

        Ok(())
    }

    async fn flush_all(&mut self, conn: &dyn Connection) -> Result<()> {
        for batch in self.statements.values_mut() {
            batch.flush(conn).await?;
        }
        Ok(())
    }
}

impl<M> SqlCacheStore<M>
where
    M: Marshaller,
{
    /// Store a single entry.
    #[instrument(level = "trace", skip(self, session, value))]
    pub async fn write(&self, session: &StoreSession, key: &M::Key, value: &M::Value) -> Result<()> {
        let outcome = async {
            let mapping = self.entry_mapping(session, key).await?;

            debug!("Start write entry to database [table={}, key={key}]", mapping.type_metadata().table);

            let conn = self.connection(session).await?;
            let outcome = self.write_entry(conn.as_ref(), &mapping, key, value).await;
            self.close_connection(session, conn).await;
            outcome
        }
        .await;

        outcome.map_err(|e| StoreError::write(format!("Failed to write entry to database [key={key}]"), e))
    }

    async fn write_entry(
        &self,
        conn: &dyn Connection,
        mapping: &EntryMapping,
        key: &M::Key,
        value: &M::Value,
    ) -> Result<()> {
        match mapping.merge_qry() {
            Some(merge) => {
                conn.execute(merge, self.merge_parameters(mapping, key, value)?).await?;
            }
            None => self.update_or_insert(conn, mapping, key, value).await?,
        }
        Ok(())
    }

    // Update the row, insert it when the update affected nothing.
    async fn update_or_insert(
        &self,
        conn: &dyn Connection,
        mapping: &EntryMapping,
        key: &M::Key,
        value: &M::Value,
    ) -> Result<()> {
        let mut params = Vec::with_capacity(mapping.cols().len());
        self.fill_value_parameters(mapping, value, &mut params)?;
        self.fill_key_parameters(mapping, key, &mut params)?;

        if conn.execute(mapping.upd_qry(), params).await? == 0 {
            trace!("No row updated for key {key}, inserting");
            conn.execute(mapping.ins_qry(), self.merge_parameters(mapping, key, value)?)
                .await?;
        }

        Ok(())
    }

    // Key columns first, then value columns: the layout of both merge and insert statements.
    fn merge_parameters(&self, mapping: &EntryMapping, key: &M::Key, value: &M::Value) -> Result<Vec<Value>> {
        let mut params = Vec::with_capacity(mapping.cols().len());
        self.fill_key_parameters(mapping, key, &mut params)?;
        self.fill_value_parameters(mapping, value, &mut params)?;
        Ok(params)
    }

    /// Store a set of entries. With a native upsert statements are sent in batches of
    /// [`batch_size`](crate::config::StoreConfig::batch_size); otherwise each entry is updated or inserted on its own.
    #[instrument(level = "trace", skip(self, session, entries))]
    pub async fn write_all<I>(&self, session: &StoreSession, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (M::Key, M::Value)>,
    {
        let outcome = async {
            let conn = self.connection(session).await?;
            let outcome = self.write_all_with(session, conn.as_ref(), entries).await;
            self.close_connection(session, conn).await;
            outcome
        }
        .await;

        outcome.map_err(|e| StoreError::write("Failed to write entries to database", e))
    }

    async fn write_all_with<I>(&self, session: &StoreSession, conn: &dyn Connection, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (M::Key, M::Value)>,
    {
        let mappings = self.ensure_type_mapping(session).await?;
        let marshaller = self.marshaller();
        let mut batches = Batches::new(self.config().batch_size);

        for (key, value) in entries {
            let key_id = marshaller.key_id(session.cache_name(), &key)?;
            let mapping = self.find_mapping(&mappings, session, &key_id, &key)?;

            batches.switch_to(&key_id, conn).await?;

            match mapping.merge_qry() {
                Some(merge) => {
                    let params = self.merge_parameters(&mapping, &key, &value)?;
                    batches.add(&key_id, merge, params, conn).await?;
                }
                None => self.update_or_insert(conn, &mapping, &key, &value).await?,
            }
        }

        batches.flush_all(conn).await
    }

    /// Remove a single entry. Removing a missing entry is not an error.
    #[instrument(level = "trace", skip(self, session))]
    pub async fn delete(&self, session: &StoreSession, key: &M::Key) -> Result<()> {
        let outcome = async {
            let mapping = self.entry_mapping(session, key).await?;

            debug!("Remove value from db [table={}, key={key}]", mapping.type_metadata().table);

            let mut params = Vec::with_capacity(mapping.key_cols().len());
            self.fill_key_parameters(&mapping, key, &mut params)?;

            let conn = self.connection(session).await?;
            let outcome = conn.execute(mapping.rem_qry(), params).await;
            self.close_connection(session, conn).await;
            outcome.map(|_| ())
        }
        .await;

        outcome.map_err(|e| StoreError::delete(format!("Failed to remove value from database [key={key}]"), e))
    }

    /// Remove a set of entries in batches of [`batch_size`](crate::config::StoreConfig::batch_size).
    #[instrument(level = "trace", skip(self, session, keys))]
    pub async fn delete_all<I>(&self, session: &StoreSession, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = M::Key>,
    {
        let outcome = async {
            let conn = self.connection(session).await?;
            let outcome = self.delete_all_with(session, conn.as_ref(), keys).await;
            self.close_connection(session, conn).await;
            outcome
        }
        .await;

        outcome.map_err(|e| StoreError::delete("Failed to remove values from database", e))
    }

    async fn delete_all_with<I>(&self, session: &StoreSession, conn: &dyn Connection, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = M::Key>,
    {
        let mappings = self.ensure_type_mapping(session).await?;
        let marshaller = self.marshaller();
        let mut batches = Batches::new(self.config().batch_size);

        for key in keys {
            let key_id = marshaller.key_id(session.cache_name(), &key)?;
            let mapping: Arc<EntryMapping> = self.find_mapping(&mappings, session, &key_id, &key)?;

            batches.switch_to(&key_id, conn).await?;

            let mut params = Vec::with_capacity(mapping.key_cols().len());
            self.fill_key_parameters(&mapping, &key, &mut params)?;
            batches.add(&key_id, mapping.rem_qry(), params, conn).await?;
        }

        batches.flush_all(conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use crate::types::ColumnSpec;
    use crate::types::Row;

    #[derive(Debug, Default)]
    struct BatchRecorder {
        batches: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl Connection for BatchRecorder {
        fn is_autocommit(&self) -> bool {
            true
        }

        async fn product_name(&self) -> Result<String> {
            Ok("recorder".into())
        }

        async fn query(&self, _sql: &str, _params: Vec<Value>, _columns: &[ColumnSpec]) -> Result<Vec<Row>> {
            Ok(vec![])
        }

        async fn execute(&self, _sql: &str, _params: Vec<Value>) -> Result<u64> {
            Ok(1)
        }

        async fn execute_batch(&self, sql: &str, batch: Vec<Vec<Value>>) -> Result<Vec<u64>> {
            self.batches.lock().push((sql.to_string(), batch.len()));
            Ok(vec![1; batch.len()])
        }

        async fn commit(&self) -> Result<()> {
            Ok(())
        }

        async fn rollback(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    #[tokio::test]
    async fn batches_flush_on_size_and_type_switch() {
        let conn = BatchRecorder::default();
        let mut batches = Batches::new(2);

        for (id, sql) in [("a", "A"), ("a", "A"), ("a", "A"), ("b", "B"), ("a", "A")] {
            batches.switch_to(&id, &conn).await.unwrap();
            batches.add(&id, sql, vec![Value::from(1)], &conn).await.unwrap();
        }
        batches.flush_all(&conn).await.unwrap();

        let recorded = conn.batches.lock().clone();
        assert_eq!(
            recorded,
            vec![
                ("A".to_string(), 2),
                ("A".to_string(), 1),
                ("B".to_string(), 1),
                ("A".to_string(), 1),
            ]
        );
    }
}
