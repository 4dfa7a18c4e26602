//! Store configuration.
use garde::Validate;
use serde::Deserialize;
use serde::Serialize;

/// Default batch size for `write_all` and `delete_all` operations.
pub const DFLT_BATCH_SIZE: usize = 512;

/// Upper limit of `max_pool_size`.
pub const MAX_POOL_SIZE: usize = 1024;

/// Default minimum row count of a table before `load_cache` partitions it into parallel range scans.
pub const DFLT_PARALLEL_LOAD_CACHE_MINIMUM_THRESHOLD: usize = 512;

fn default_max_pool_size() -> usize {
    num_cpus::get().min(MAX_POOL_SIZE)
}

fn default_batch_size() -> usize {
    DFLT_BATCH_SIZE
}

fn default_parallel_load_cache_minimum_threshold() -> usize {
    DFLT_PARALLEL_LOAD_CACHE_MINIMUM_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Connection URL. Ignored when the store is given a data source.
    #[serde(default)]
    #[garde(skip)]
    pub connection_url: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub user: Option<String>,

    #[serde(default, skip_serializing)]
    #[garde(skip)]
    pub password: Option<String>,

    /// Max number of workers running `load_cache` tasks concurrently.
    #[serde(default = "default_max_pool_size")]
    #[garde(range(min = 1, max = MAX_POOL_SIZE))]
    pub max_pool_size: usize,

    /// Maximum batch size for `write_all` and `delete_all` operations.
    #[serde(default = "default_batch_size")]
    #[garde(range(min = 1))]
    pub batch_size: usize,

    /// Parallel load cache minimum row count threshold. If `0` then load sequentially.
    #[serde(default = "default_parallel_load_cache_minimum_threshold")]
    #[garde(skip)]
    pub parallel_load_cache_minimum_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            connection_url: None,
            user: None,
            password: None,
            max_pool_size: default_max_pool_size(),
            batch_size: default_batch_size(),
            parallel_load_cache_minimum_threshold: default_parallel_load_cache_minimum_threshold(),
        }
    }
}

impl StoreConfig {
    pub fn with_connection_url<S: Into<String>>(mut self, url: S) -> Self {
        self.connection_url = Some(url.into());
        self
    }

    pub fn with_credentials<U: Into<String>, P: Into<String>>(mut self, user: U, password: P) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_max_pool_size(mut self, max_pool_size: usize) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallel_load_cache_minimum_threshold(mut self, threshold: usize) -> Self {
        self.parallel_load_cache_minimum_threshold = threshold;
        self
    }

    pub fn has_connection_url(&self) -> bool {
        self.connection_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}
