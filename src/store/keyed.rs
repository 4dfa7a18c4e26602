//! Loading entries by key.
use fieldx_plus::child_build;
use fieldx_plus::fx_plus;
use fieldx_plus::Child;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tracing::instrument;

use super::SqlCacheStore;
use crate::error::Result;
use crate::error::StoreError;
use crate::mapping::EntryMapping;
use crate::session::StoreSession;
use crate::traits::Connection;
use crate::traits::Marshaller;

/// Accumulates keys of one type and selects them with a single statement.
#[fx_plus(child(SqlCacheStore<M>, rc_strong), sync, default(off))]
pub(crate) struct LoadWorker<M>
where
    M: Marshaller,
{
    conn:    Arc<dyn Connection>,
    mapping: Arc<EntryMapping>,
    keys:    Vec<M::Key>,
}

impl<M> LoadWorker<M>
where
    M: Marshaller,
{
    fn push(&mut self, key: M::Key) -> bool {
        self.keys.push(key);
        self.keys.len() >= self.mapping.max_keys_per_stmt()
    }

    async fn call(self) -> Result<Vec<(M::Key, M::Value)>> {
        let parent = self.parent();
        let marshaller = parent.marshaller();
        let mapping = &self.mapping;

        let sql = mapping.load_query(self.keys.len())?;

        let mut params = Vec::with_capacity(self.keys.len() * mapping.key_cols().len());
        for key in &self.keys {
            parent.fill_key_parameters(mapping, key, &mut params)?;
        }

        let rows = self.conn.query(&sql, params, mapping.columns()).await?;

        rows.iter()
            .map(|row| {
                Ok((
                    marshaller.build_key(mapping.key_type(), mapping.key_descriptors(), row)?,
                    marshaller.build_value(mapping.value_type(), mapping.value_descriptors(), row)?,
                ))
            })
            .collect()
    }
}

impl<M> SqlCacheStore<M>
where
    M: Marshaller,
{
    /// Read a single entry. `None` if the database has no row for the key.
    #[instrument(level = "trace", skip(self, session))]
    pub async fn load(&self, session: &StoreSession, key: &M::Key) -> Result<Option<M::Value>> {
        self.load_one(session, key)
            .await
            .map_err(|e| StoreError::load(format!("Failed to load object [key={key}]"), e))
    }

    async fn load_one(&self, session: &StoreSession, key: &M::Key) -> Result<Option<M::Value>> {
        let mapping = self.entry_mapping(session, key).await?;

        debug!("Load value from db [table={}, key={key}]", mapping.type_metadata().table);

        let conn = self.connection(session).await?;
        let outcome = self.select_one(conn.as_ref(), &mapping, key).await;
        self.close_connection(session, conn).await;
        outcome
    }

    async fn select_one(&self, conn: &dyn Connection, mapping: &EntryMapping, key: &M::Key) -> Result<Option<M::Value>> {
        let mut params = Vec::with_capacity(mapping.key_cols().len());
        self.fill_key_parameters(mapping, key, &mut params)?;

        let rows = conn.query(&mapping.load_query(1)?, params, mapping.columns()).await?;

        rows.first()
            .map(|row| {
                self.marshaller()
                    .build_value(mapping.value_type(), mapping.value_descriptors(), row)
            })
            .transpose()
    }

    /// Read a set of entries. Keys of one type are selected in groups of at most
    /// [`max_keys_per_stmt`](EntryMapping::max_keys_per_stmt) keys per statement. Keys without a row are absent from
    /// the result.
    #[instrument(level = "trace", skip(self, session, keys))]
    pub async fn load_all<I>(&self, session: &StoreSession, keys: I) -> Result<HashMap<M::Key, M::Value>>
    where
        I: IntoIterator<Item = M::Key>,
    {
        let outcome = async {
            let conn = self.connection(session).await?;
            let outcome = self.load_all_with(session, &conn, keys).await;
            self.close_connection(session, conn).await;
            outcome
        }
        .await;

        outcome.map_err(|e| StoreError::load("Failed to load objects from database", e))
    }

    async fn load_all_with<I>(
        &self,
        session: &StoreSession,
        conn: &Arc<dyn Connection>,
        keys: I,
    ) -> Result<HashMap<M::Key, M::Value>>
    where
        I: IntoIterator<Item = M::Key>,
    {
        let mappings = self.ensure_type_mapping(session).await?;
        let marshaller = self.marshaller();

        let mut workers: HashMap<M::KeyId, LoadWorker<M>> = HashMap::with_capacity(mappings.len());
        let mut loaded = HashMap::new();

        for key in keys {
            let key_id = marshaller.key_id(session.cache_name(), &key)?;

            let full = match workers.entry(key_id.clone()) {
                Entry::Occupied(mut worker) => worker.get_mut().push(key),
                Entry::Vacant(slot) => {
                    let mapping = self.find_mapping(&mappings, session, &key_id, &key)?;
                    slot.insert(self.load_worker(conn, mapping)?).push(key)
                }
            };

            if full {
                if let Some(worker) = workers.remove(&key_id) {
                    loaded.extend(worker.call().await?);
                }
            }
        }

        for (_, worker) in workers {
            loaded.extend(worker.call().await?);
        }

        Ok(loaded)
    }

    fn load_worker(&self, conn: &Arc<dyn Connection>, mapping: Arc<EntryMapping>) -> Result<LoadWorker<M>> {
        let capacity = mapping.max_keys_per_stmt().min(64);
        child_build!(
            self,
            LoadWorker<M> {
                keys: Vec::with_capacity(capacity),
                conn: conn.clone(),
                mapping: mapping,
            }
        )
        .map_err(|e| StoreError::Internal(e.to_string()))
    }
}
