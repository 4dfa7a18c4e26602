//! Full cache load: one task per type, or per key range of a type when the table is big enough.
use fieldx_plus::child_build;
use fieldx_plus::fx_plus;
use fieldx_plus::Child;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::instrument;
use tracing::trace;

use super::SqlCacheStore;
use crate::error::Result;
use crate::error::StoreError;
use crate::mapping::cache_display_name;
use crate::mapping::EntryMapping;
use crate::session::StoreSession;
use crate::traits::Connection;
use crate::traits::Marshaller;
use crate::types::Value;

/// Receiver of loaded entries. Called from worker tasks, possibly concurrently.
pub type Consumer<M> = Arc<dyn Fn(<M as Marshaller>::Key, <M as Marshaller>::Value) + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) enum LoadQuery {
    /// Rows with keys in `[lower, upper)`; a missing bound is open.
    Range {
        lower: Option<Vec<Value>>,
        upper: Option<Vec<Value>>,
    },
    /// Caller-supplied select statement.
    Custom(String),
}

impl LoadQuery {
    fn full_scan() -> Self {
        Self::Range {
            lower: None,
            upper: None,
        }
    }

    /// SQL text and parameters of the query against `mapping`.
    fn statement(&self, mapping: &EntryMapping) -> (String, Vec<Value>) {
        match self {
            LoadQuery::Range { lower, upper } => {
                let mut params = vec![];
                for bound in [lower, upper].into_iter().flatten() {
                    params.extend(triangular(bound));
                }
                (
                    mapping.load_cache_range_query(lower.is_some(), upper.is_some()).to_string(),
                    params,
                )
            }
            LoadQuery::Custom(sql) => (sql.clone(), vec![]),
        }
    }
}

#[fx_plus(child(SqlCacheStore<M>, rc_strong), sync, default(off))]
pub(crate) struct LoadCacheTask<M>
where
    M: Marshaller,
{
    mapping: Arc<EntryMapping>,
    query:   LoadQuery,
}

impl<M> LoadCacheTask<M>
where
    M: Marshaller,
{
    async fn run(self, consumer: Consumer<M>) -> Result<usize> {
        let parent = self.parent();
        let runtime = parent.ensure_initialized().await?;
        let conn = runtime.connections.open_connection(true).await?;

        let outcome = self.fetch(conn.as_ref(), parent.marshaller().as_ref(), &consumer).await;

        conn.close().await;
        outcome
    }

    async fn fetch(&self, conn: &dyn Connection, marshaller: &M, consumer: &Consumer<M>) -> Result<usize> {
        let mapping = &self.mapping;

        let (sql, params) = self.query.statement(mapping);

        trace!("Load cache task for {}: {sql}", mapping.key_type());

        let rows = conn.query(&sql, params, mapping.columns()).await?;
        let count = rows.len();

        for row in rows {
            let key = marshaller.build_key(mapping.key_type(), mapping.key_descriptors(), &row)?;
            let value = marshaller.build_value(mapping.value_type(), mapping.value_descriptors(), &row)?;
            consumer(key, value);
        }

        Ok(count)
    }
}

/// Parameters of a tiered range bound: the whole bound, then the bound without its last element, and so on down to
/// the first element alone.
pub(crate) fn triangular(bound: &[Value]) -> impl Iterator<Item = Value> + '_ {
    (1..=bound.len()).rev().flat_map(move |len| bound[..len].iter().cloned())
}

impl<M> SqlCacheStore<M>
where
    M: Marshaller,
{
    /// Load every entry of the session's logical cache and hand it to `consumer`.
    ///
    /// Without `queries` every mapped type is loaded; big tables are split into key ranges loaded in parallel. With
    /// `queries`, a list of `(key type name, select statement)` pairs, only the given statements run.
    #[instrument(level = "debug", skip(self, consumer, queries))]
    pub async fn load_cache<F>(
        &self,
        session: &StoreSession,
        consumer: F,
        queries: Option<Vec<(String, String)>>,
    ) -> Result<()>
    where
        F: Fn(M::Key, M::Value) + Send + Sync + 'static,
    {
        self.load_cache_inner(session, Arc::new(consumer), queries)
            .await
            .map_err(|e| StoreError::load("Failed to load cache", e))
    }

    /// Same as [`load_cache`](Self::load_cache) with custom queries given as a flat list of alternating key type
    /// names and select statements.
    pub async fn load_cache_with_args<F>(&self, session: &StoreSession, consumer: F, args: &[&str]) -> Result<()>
    where
        F: Fn(M::Key, M::Value) + Send + Sync + 'static,
    {
        let queries = if args.is_empty() {
            None
        }
        else {
            if args.len() % 2 != 0 {
                return Err(StoreError::load(
                    "Failed to load cache",
                    StoreError::InvalidArguments(args.len()),
                ));
            }
            Some(
                args.chunks(2)
                    .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                    .collect(),
            )
        };

        self.load_cache(session, consumer, queries).await
    }

    async fn load_cache_inner(
        &self,
        session: &StoreSession,
        consumer: Consumer<M>,
        queries: Option<Vec<(String, String)>>,
    ) -> Result<()> {
        let mappings = self.ensure_type_mapping(session).await?;
        let config = self.config();
        let permits = Arc::new(Semaphore::new(config.max_pool_size));
        let mut tasks = JoinSet::new();

        match queries {
            Some(queries) => {
                let marshaller = self.marshaller();
                for (type_name, sql) in queries {
                    let key_id = marshaller.key_id_for_type(&type_name)?;
                    let mapping = self.find_mapping(&mappings, session, &key_id, &type_name)?;
                    debug!("Started load cache using custom statement [type={type_name}]");
                    self.submit(&mut tasks, &permits, &consumer, mapping, LoadQuery::Custom(sql))?;
                }
            }
            None => {
                let threshold = config.parallel_load_cache_minimum_threshold;
                for mapping in mappings.values() {
                    if threshold == 0 {
                        self.submit(&mut tasks, &permits, &consumer, mapping.clone(), LoadQuery::full_scan())?;
                        continue;
                    }

                    let bounds = match self.sample_bounds(session, mapping, threshold).await {
                        Ok(bounds) => bounds,
                        Err(err) => {
                            debug!(
                                "Range sampling failed for type {}, loading it with one scan: {err}",
                                mapping.key_type()
                            );
                            vec![]
                        }
                    };

                    debug!(
                        "Started load cache [cache={}, keyType={}, ranges={}]",
                        cache_display_name(session.cache_name()),
                        mapping.key_type(),
                        bounds.len() + 1
                    );

                    for query in range_queries(bounds) {
                        self.submit(&mut tasks, &permits, &consumer, mapping.clone(), query)?;
                    }
                }
            }
        }

        let mut loaded = 0;
        while let Some(joined) = tasks.join_next().await {
            // The first failure wins; dropping the set aborts the tasks still running.
            loaded += joined??;
        }

        debug!(
            "Loaded {loaded} entries into cache {}",
            cache_display_name(session.cache_name())
        );

        Ok(())
    }

    fn submit(
        &self,
        tasks: &mut JoinSet<Result<usize>>,
        permits: &Arc<Semaphore>,
        consumer: &Consumer<M>,
        mapping: Arc<EntryMapping>,
        query: LoadQuery,
    ) -> Result<()> {
        let task = child_build!(
            self,
            LoadCacheTask<M> {
                mapping: mapping,
                query: query,
            }
        )
        .map_err(|e| StoreError::Internal(e.to_string()))?;

        let permits = permits.clone();
        let consumer = consumer.clone();
        tasks.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            task.run(consumer).await
        });

        Ok(())
    }

    /// Key values of every `threshold`-th row in key order. Empty when the table is smaller than the threshold.
    async fn sample_bounds(
        &self,
        session: &StoreSession,
        mapping: &EntryMapping,
        threshold: usize,
    ) -> Result<Vec<Vec<Value>>> {
        let conn = self.connection(session).await?;
        let rows = conn
            .query(
                mapping.load_cache_sel_range_qry(),
                vec![Value::from(threshold as i64)],
                mapping.key_columns(),
            )
            .await;
        self.close_connection(session, conn).await;

        Ok(rows?
            .into_iter()
            .map(|row| row.values().cloned().collect())
            .collect())
    }
}

/// Adjacent windows covering the whole key space: `(-, b1)`, `[b1, b2)`, ..., `[bN, -)`.
fn range_queries(bounds: Vec<Vec<Value>>) -> Vec<LoadQuery> {
    if bounds.is_empty() {
        return vec![LoadQuery::full_scan()];
    }

    let mut queries = Vec::with_capacity(bounds.len() + 1);
    let mut lower = None;
    for bound in bounds {
        queries.push(LoadQuery::Range {
            lower: lower.take(),
            upper: Some(bound.clone()),
        });
        lower = Some(bound);
    }
    queries.push(LoadQuery::Range { lower, upper: None });
    queries
}
