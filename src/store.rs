//! The store: initialization, connection binding and mapping lookup. Loading and writing live in submodules.
mod keyed;
mod loader;
mod writer;

use fieldx_plus::fx_plus;
use garde::Validate;
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::instrument;

use crate::config::StoreConfig;
use crate::dialect::resolve_for_product_name;
use crate::dialect::Dialect;
use crate::driver::SeaOrmProvider;
use crate::error::Result;
use crate::error::StoreError;
use crate::mapping::cache_display_name;
use crate::mapping::EntryMapping;
use crate::mapping::MappingRegistry;
use crate::mapping::TypeMappings;
use crate::session::StoreSession;
use crate::traits::Connection;
use crate::traits::ConnectionProvider;
use crate::traits::Marshaller;
use crate::traits::TypeMetadataProvider;
use crate::types::Value;

pub use loader::Consumer;

/// What a successful initialization produces.
#[derive(Clone, Debug)]
pub struct StoreRuntime {
    pub dialect:     Arc<dyn Dialect>,
    pub connections: Arc<dyn ConnectionProvider>,
}

/// Cache store backed by a SQL database.
///
/// ```ignore
/// let store = SqlCacheStore::builder()
///     .marshaller(Arc::new(MyMarshaller::new()))
///     .metadata_provider(Arc::new(StaticTypeMetadata::from_default(types)))
///     .config(StoreConfig::default().with_connection_url("sqlite://cache.db?mode=rwc"))
///     .build()?;
///
/// let session = StoreSession::new(Some("people"));
/// store.write(&session, &key, &person).await?;
/// assert_eq!(store.load(&session, &key).await?, Some(person));
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`SqlCacheStore`].", "", "See [`SqlCacheStore::builder()`] method."),
        method_doc("Implement builder pattern for [`SqlCacheStore`]."),
    )
)]
pub struct SqlCacheStore<M>
where
    M: Marshaller,
{
    #[fieldx(vis(pub(crate)), builder(vis(pub), required), get(clone))]
    marshaller: Arc<M>,

    #[fieldx(vis(pub(crate)), builder(vis(pub), required), get(clone))]
    metadata_provider: Arc<dyn TypeMetadataProvider>,

    /// Pre-configured connection source. Takes precedence over the connection URL of the configuration.
    #[fieldx(optional, get(clone), builder(vis(pub)))]
    data_source: Arc<dyn ConnectionProvider>,

    /// Dialect override. Without it the dialect is resolved by the database product name.
    #[fieldx(optional, get(clone), builder(vis(pub)))]
    dialect: Arc<dyn Dialect>,

    #[fieldx(get, builder(vis(pub)), default(StoreConfig::default()))]
    config: StoreConfig,

    #[fieldx(private, get, builder(off), default(OnceCell::new()))]
    runtime: OnceCell<Result<StoreRuntime, Arc<StoreError>>>,

    /// Cache with entry mapping description: (cache name, (key id, mapping description)).
    #[fieldx(private, get, builder(off), default(MappingRegistry::new()))]
    registry: MappingRegistry<M::KeyId>,
}

impl<M> SqlCacheStore<M>
where
    M: Marshaller,
{
    async fn initialize(&self) -> Result<StoreRuntime> {
        debug!("Initializing cache store.");

        let config = self.config();
        config.validate()?;

        let connections: Arc<dyn ConnectionProvider> = if let Some(data_source) = self.data_source() {
            data_source
        }
        else if config.has_connection_url() {
            Arc::new(SeaOrmProvider::from_config(config)?)
        }
        else {
            return Err(StoreError::NoConnectionSource);
        };

        let dialect = match self.dialect() {
            Some(dialect) => dialect,
            None => Self::resolve_dialect(connections.as_ref()).await?,
        };

        debug!("Cache store uses {} dialect.", dialect.name());

        Ok(StoreRuntime { dialect, connections })
    }

    async fn resolve_dialect(connections: &dyn ConnectionProvider) -> Result<Arc<dyn Dialect>> {
        let conn = connections
            .open_connection(true)
            .await
            .map_err(|e| StoreError::DialectResolution(Box::new(e)))?;

        let product_name = conn.product_name().await;
        conn.close().await;

        Ok(resolve_for_product_name(
            &product_name.map_err(|e| StoreError::DialectResolution(Box::new(e)))?,
        ))
    }

    /// Make sure the store is initialized. The first caller resolves the connection source and the dialect, all
    /// concurrent callers wait for it. A failed initialization is final for this store instance.
    pub async fn ensure_initialized(&self) -> Result<StoreRuntime> {
        self.runtime()
            .get_or_init(|| async { self.initialize().await.map_err(Arc::new) })
            .await
            .clone()
            .map_err(StoreError::Initialization)
    }

    /// The dialect in use; initializes the store if necessary.
    pub async fn resolved_dialect(&self) -> Result<Arc<dyn Dialect>> {
        Ok(self.ensure_initialized().await?.dialect)
    }

    /// Mappings of the session's logical cache, built on first request. Metadata is fetched and mappings are built
    /// at most once per logical cache no matter how many callers race for it.
    #[instrument(level = "trace", skip(self))]
    pub async fn ensure_type_mapping(&self, session: &StoreSession) -> Result<Arc<TypeMappings<M::KeyId>>> {
        let runtime = self.ensure_initialized().await?;
        let cache_name = session.cache_name();

        self.registry()
            .get_or_build(cache_name, || async {
                let types = self.metadata_provider().type_metadata(cache_name).await?;
                let marshaller = self.marshaller();

                let mut mappings = HashMap::with_capacity(types.len());
                for type_metadata in &types {
                    mappings.insert(
                        marshaller.key_id_for_type(&type_metadata.key_type)?,
                        Arc::new(EntryMapping::new(runtime.dialect.clone(), type_metadata.clone())?),
                    );
                }

                marshaller.build_type_cache(cache_name, &types)?;

                debug!(
                    "Built {} entry mapping(s) for cache {}",
                    mappings.len(),
                    cache_display_name(cache_name)
                );

                Ok(mappings)
            })
            .await
    }

    pub(crate) fn find_mapping(
        &self,
        mappings: &TypeMappings<M::KeyId>,
        session: &StoreSession,
        key_id: &M::KeyId,
        key: &dyn Display,
    ) -> Result<Arc<EntryMapping>> {
        mappings.get(key_id).cloned().ok_or_else(|| StoreError::MappingNotFound {
            key:   key.to_string(),
            cache: cache_display_name(session.cache_name()).to_string(),
        })
    }

    /// Mapping for a key of the session's logical cache.
    pub async fn entry_mapping(&self, session: &StoreSession, key: &M::Key) -> Result<Arc<EntryMapping>> {
        let mappings = self.ensure_type_mapping(session).await?;
        let key_id = self.marshaller().key_id(session.cache_name(), key)?;
        self.find_mapping(&mappings, session, &key_id, key)
    }

    /// Connection for an operation of the session. Inside a transaction it is the connection pinned to the
    /// transaction, opened without autocommit on first use. Outside of one it is a fresh autocommit connection.
    pub async fn connection(&self, session: &StoreSession) -> Result<Arc<dyn Connection>> {
        let runtime = self.ensure_initialized().await?;

        if session.in_transaction() {
            session
                .bind_with(|| runtime.connections.open_connection(false))
                .await
        }
        else {
            runtime.connections.open_connection(true).await
        }
    }

    /// Close a connection obtained with [`connection()`](Self::connection). A connection bound to a transaction stays
    /// open until [`tx_end()`](Self::tx_end).
    pub async fn close_connection(&self, session: &StoreSession, conn: Arc<dyn Connection>) {
        if !session.in_transaction() {
            conn.close().await;
        }
    }

    /// Commit or roll back the connection bound to the session's transaction and release it. A transaction that
    /// never touched the database has no connection, which is fine.
    #[instrument(level = "debug", skip(self))]
    pub async fn tx_end(&self, session: &StoreSession, commit: bool) -> Result<()> {
        if let Some(conn) = session.unbind().await {
            let outcome = if commit {
                conn.commit().await
            }
            else {
                conn.rollback().await
            };

            conn.close().await;

            outcome.map_err(|e| StoreError::TxEnd {
                xid: session.transaction().map(|tx| tx.to_string()).unwrap_or_default(),
                commit,
                source: Box::new(e),
            })?;
        }

        if let Some(tx) = session.transaction() {
            debug!("Transaction ended [xid={tx}, commit={commit}]");
        }

        Ok(())
    }

    pub(crate) fn fill_key_parameters(&self, mapping: &EntryMapping, key: &M::Key, params: &mut Vec<Value>) -> Result<()> {
        let marshaller = self.marshaller();
        for field in mapping.key_descriptors() {
            params.push(
                marshaller
                    .extract_key_field(mapping.key_type(), field, key)?
                    .unwrap_or_else(|| field.db_type.null_value()),
            );
        }
        Ok(())
    }

    pub(crate) fn fill_value_parameters(
        &self,
        mapping: &EntryMapping,
        value: &M::Value,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        let marshaller = self.marshaller();
        for field in mapping.uniq_val_fields() {
            params.push(
                marshaller
                    .extract_value_field(mapping.value_type(), field, value)?
                    .unwrap_or_else(|| field.db_type.null_value()),
            );
        }
        Ok(())
    }
}

impl<M> Debug for SqlCacheStore<M>
where
    M: Marshaller,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlCacheStore")
            .field("config", self.config())
            .field("caches", &self.registry().len())
            .finish()
    }
}
