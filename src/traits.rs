use async_trait::async_trait;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::Result;
use crate::types::ColumnSpec;
use crate::types::FieldDescriptor;
use crate::types::Row;
use crate::types::TypeMetadata;
use crate::types::Value;

/// Moves data between cache objects and table rows.
///
/// The store knows nothing about the layout of keys and values. Everything it needs is asked from the marshaller:
/// field values to bind as statement parameters, objects rebuilt from result rows, and the type identifier of a key
/// which selects the [`EntryMapping`](crate::mapping::EntryMapping) to use.
///
/// When a cache holds more than one key type an enum is the natural choice for both `Key` and `Value`.
pub trait Marshaller: Send + Sync + 'static {
    type Key: Debug + Display + Hash + Clone + Eq + Send + Sync + 'static;
    type Value: Debug + Clone + Send + Sync + 'static;
    /// Identifies the mapping of a key. Two keys with equal ids are stored in the same table.
    type KeyId: Debug + Display + Hash + Clone + Eq + Send + Sync + 'static;

    /// Value of `field` of a key object. `None` is bound as a `NULL` of the field's column type.
    fn extract_key_field(&self, type_name: &str, field: &FieldDescriptor, key: &Self::Key) -> Result<Option<Value>>;

    /// Value of `field` of a value object. `None` is bound as a `NULL` of the field's column type.
    fn extract_value_field(
        &self,
        type_name: &str,
        field: &FieldDescriptor,
        value: &Self::Value,
    ) -> Result<Option<Value>>;

    fn build_key(&self, type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<Self::Key>;

    fn build_value(&self, type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<Self::Value>;

    /// Type id of a key stored in the logical cache `cache_name`.
    fn key_id(&self, cache_name: Option<&str>, key: &Self::Key) -> Result<Self::KeyId>;

    /// Type id by the key type name declared in [`TypeMetadata`].
    fn key_id_for_type(&self, type_name: &str) -> Result<Self::KeyId>;

    /// Called once per logical cache, right before its mappings become visible.
    fn build_type_cache(&self, _cache_name: Option<&str>, _types: &[TypeMetadata]) -> Result<()> {
        Ok(())
    }
}

/// Source of [`TypeMetadata`] declared by the cache engine for a logical cache.
#[async_trait]
pub trait TypeMetadataProvider: Debug + Send + Sync + 'static {
    async fn type_metadata(&self, cache_name: Option<&str>) -> Result<Vec<TypeMetadata>>;
}

/// A single database connection as the store sees it.
///
/// Statements are SQL texts produced by a [`Dialect`](crate::dialect::Dialect) with positional parameters.
#[async_trait]
pub trait Connection: Debug + Send + Sync + 'static {
    fn is_autocommit(&self) -> bool;

    /// Database product name used for dialect resolution.
    async fn product_name(&self) -> Result<String>;

    /// Run a query and decode every row by the given column specs.
    async fn query(&self, sql: &str, params: Vec<Value>, columns: &[ColumnSpec]) -> Result<Vec<Row>>;

    /// Run a modification statement; returns the number of affected rows.
    async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64>;

    /// Run the same statement once per parameter set as a single batch.
    async fn execute_batch(&self, sql: &str, batch: Vec<Vec<Value>>) -> Result<Vec<u64>>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    /// Release the connection. Must not fail; problems are only worth a log record at this point.
    async fn close(&self);
}

#[async_trait]
pub trait ConnectionProvider: Debug + Send + Sync + 'static {
    async fn open_connection(&self, autocommit: bool) -> Result<Arc<dyn Connection>>;
}
