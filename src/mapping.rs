//! Entry mappings and their per-cache registry.
use fieldx::fxstruct;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::error::StoreError;
use crate::types::ColumnSpec;
use crate::types::FieldDescriptor;
use crate::types::TypeMetadata;

/// Multi-key select texts for uncommon key counts are kept around in a bounded cache.
const LOAD_QUERY_CACHE_CAPACITY: u64 = 64;

/// Precompiled SQL and column layout of one key/value type of a logical cache.
#[fxstruct(sync, no_new, get)]
pub struct EntryMapping {
    #[fieldx(get(off))]
    dialect: Arc<dyn Dialect>,

    type_metadata: TypeMetadata,

    /// Database key columns.
    key_cols: Vec<String>,

    /// Value fields not duplicating a key column.
    uniq_val_fields: Vec<FieldDescriptor>,

    /// Key columns followed by unique value columns. This is the select list of every row-returning statement.
    cols: Vec<String>,

    /// Decoding specs matching `cols`.
    columns: Vec<ColumnSpec>,

    /// Decoding specs of the key columns alone.
    key_columns: Vec<ColumnSpec>,

    /// Select all items query.
    load_cache_qry: String,

    /// Select border for range queries.
    load_cache_sel_range_qry: String,

    /// Range scans by the presence of the lower and the upper bound: (lower, upper), (lower, -), (-, upper).
    #[fieldx(get(off))]
    load_cache_range_qry: [String; 3],

    #[fieldx(get(off))]
    load_qry_single: Arc<str>,

    #[fieldx(get(off))]
    load_qry: Arc<str>,

    merge_qry: Option<String>,

    ins_qry: String,

    upd_qry: String,

    rem_qry: String,

    /// Max key count for load query per statement.
    #[fieldx(get(copy))]
    max_keys_per_stmt: usize,

    #[fieldx(get(off))]
    load_qry_cache: moka::sync::Cache<usize, Arc<str>>,
}

impl EntryMapping {
    pub fn new(dialect: Arc<dyn Dialect>, type_metadata: TypeMetadata) -> Result<Self> {
        let invalid = |reason: String| StoreError::InvalidMapping {
            type_name: type_metadata.key_type.clone(),
            reason,
        };

        let key_fields = &type_metadata.key_fields;
        if key_fields.is_empty() {
            return Err(invalid("no key columns declared".to_string()));
        }

        let max_params = dialect.max_params_count();
        if key_fields.len() > max_params {
            return Err(invalid(format!(
                "{} key columns exceed the limit of {max_params} statement parameters of {} dialect",
                key_fields.len(),
                dialect.name()
            )));
        }

        let schema = type_metadata.schema.as_str();
        let table = type_metadata.table.as_str();

        let key_cols = key_fields.iter().map(|f| f.column.clone()).collect::<Vec<_>>();
        let uniq_val_fields = type_metadata
            .value_fields
            .iter()
            .filter(|f| !key_cols.iter().any(|k| k.eq_ignore_ascii_case(&f.column)))
            .cloned()
            .collect::<Vec<_>>();
        let uniq_val_cols = uniq_val_fields.iter().map(|f| f.column.clone()).collect::<Vec<_>>();
        let cols = key_cols.iter().chain(&uniq_val_cols).cloned().collect::<Vec<_>>();

        let key_columns = key_fields.iter().map(FieldDescriptor::column_spec).collect::<Vec<_>>();
        let columns = key_columns
            .iter()
            .cloned()
            .chain(uniq_val_fields.iter().map(FieldDescriptor::column_spec))
            .collect::<Vec<_>>();

        let max_keys_per_stmt = max_params / key_cols.len();

        let load_cache_range_qry = [
            dialect.load_cache_range_query(schema, table, &key_cols, &cols, true, true),
            dialect.load_cache_range_query(schema, table, &key_cols, &cols, true, false),
            dialect.load_cache_range_query(schema, table, &key_cols, &cols, false, true),
        ];

        Ok(Self {
            load_cache_qry: dialect.load_cache_query(schema, table, &cols),
            load_cache_sel_range_qry: dialect.load_cache_select_range_query(schema, table, &key_cols),
            load_cache_range_qry,
            load_qry_single: Arc::from(dialect.load_query(schema, table, &key_cols, &cols, 1)),
            load_qry: Arc::from(dialect.load_query(schema, table, &key_cols, &cols, max_keys_per_stmt)),
            merge_qry: dialect
                .has_merge()
                .then(|| dialect.merge_query(schema, table, &key_cols, &uniq_val_cols))
                .flatten(),
            ins_qry: dialect.insert_query(schema, table, &key_cols, &uniq_val_cols),
            upd_qry: dialect.update_query(schema, table, &key_cols, &uniq_val_cols),
            rem_qry: dialect.remove_query(schema, table, &key_cols),
            max_keys_per_stmt,
            load_qry_cache: moka::sync::Cache::new(LOAD_QUERY_CACHE_CAPACITY),
            key_cols,
            uniq_val_fields,
            cols,
            columns,
            key_columns,
            dialect,
            type_metadata,
        })
    }

    pub fn key_type(&self) -> &str {
        &self.type_metadata.key_type
    }

    pub fn value_type(&self) -> &str {
        &self.type_metadata.value_type
    }

    pub fn key_descriptors(&self) -> &[FieldDescriptor] {
        &self.type_metadata.key_fields
    }

    pub fn value_descriptors(&self) -> &[FieldDescriptor] {
        &self.type_metadata.value_fields
    }

    /// Select statement for `key_count` keys, `key_count` must not exceed
    /// [`max_keys_per_stmt`](Self::max_keys_per_stmt).
    pub fn load_query(&self, key_count: usize) -> Result<Arc<str>> {
        if key_count == 0 || key_count > self.max_keys_per_stmt {
            return Err(StoreError::Internal(format!(
                "cannot select {key_count} keys of type '{}' with one statement (max {})",
                self.key_type(),
                self.max_keys_per_stmt
            )));
        }

        if key_count == self.max_keys_per_stmt {
            return Ok(self.load_qry.clone());
        }

        if key_count == 1 {
            return Ok(self.load_qry_single.clone());
        }

        Ok(self.load_qry_cache.get_with(key_count, || {
            let meta = &self.type_metadata;
            Arc::from(
                self.dialect
                    .load_query(&meta.schema, &meta.table, &self.key_cols, &self.cols, key_count),
            )
        }))
    }

    /// Range scan for the given bound presence. With neither bound it is the full scan.
    pub fn load_cache_range_query(&self, lower: bool, upper: bool) -> &str {
        match (lower, upper) {
            (true, true) => &self.load_cache_range_qry[0],
            (true, false) => &self.load_cache_range_qry[1],
            (false, true) => &self.load_cache_range_qry[2],
            (false, false) => &self.load_cache_qry,
        }
    }
}

impl Debug for EntryMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryMapping")
            .field("key_type", &self.type_metadata.key_type)
            .field("value_type", &self.type_metadata.value_type)
            .field("table", &self.type_metadata.table)
            .field("max_keys_per_stmt", &self.max_keys_per_stmt)
            .finish()
    }
}

pub type TypeMappings<Id> = HashMap<Id, Arc<EntryMapping>>;

/// Display name of a logical cache.
pub fn cache_display_name(cache_name: Option<&str>) -> &str {
    cache_name.unwrap_or("<default>")
}

/// Per logical cache mappings. A cache's mappings are published whole and never change afterwards.
pub struct MappingRegistry<Id>
where
    Id: Hash + Eq,
{
    published:  parking_lot::RwLock<HashMap<Option<String>, Arc<TypeMappings<Id>>>>,
    build_lock: tokio::sync::Mutex<()>,
}

impl<Id> MappingRegistry<Id>
where
    Id: Hash + Eq,
{
    pub fn new() -> Self {
        Self {
            published:  parking_lot::RwLock::new(HashMap::new()),
            build_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self, cache_name: Option<&str>) -> Option<Arc<TypeMappings<Id>>> {
        self.published.read().get(&cache_name.map(str::to_string)).cloned()
    }

    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the published mappings of a cache, building them with `build` if there are none yet. Concurrent callers
    /// for the same cache wait for the one doing the build; `build` runs at most once per cache unless it fails.
    pub async fn get_or_build<F, Fut>(&self, cache_name: Option<&str>, build: F) -> Result<Arc<TypeMappings<Id>>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<TypeMappings<Id>>>,
    {
        if let Some(mappings) = self.get(cache_name) {
            return Ok(mappings);
        }

        let _guard = self.build_lock.lock().await;

        if let Some(mappings) = self.get(cache_name) {
            return Ok(mappings);
        }

        let mappings = Arc::new(build().await?);
        self.published
            .write()
            .insert(cache_name.map(str::to_string), Arc::clone(&mappings));

        Ok(mappings)
    }
}

impl<Id> Default for MappingRegistry<Id>
where
    Id: Hash + Eq,
{
    fn default() -> Self {
        Self::new()
    }
}
