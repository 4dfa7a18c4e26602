//! # cache-sql-store
//!
//! Read-through/write-through persistence of key/value caches in SQL tables.
//!
//! A cache engine hands the store keys and values; the store turns them into rows of the tables declared for their
//! types and back. It is the piece that sits between an in-memory cache and a relational database: the cache asks it
//! to load what it misses, to persist what gets written and to remove what gets deleted, and it asks it to preload
//! whole tables at startup.
//!
//! # The Basics
//!
//! The crate is designed around a few collaborators:
//!
//! - A [`Marshaller`](traits::Marshaller) moves fields between cache objects and statement parameters or result rows.
//!   It also tells which type a key belongs to. [`JsonMarshaller`](marshaller::JsonMarshaller) does it for any
//!   `serde` type.
//! - A [`TypeMetadataProvider`](traits::TypeMetadataProvider) declares, per logical cache, which key and value types
//!   are stored in which table and column. [`StaticTypeMetadata`](metadata::StaticTypeMetadata) is the plain
//!   declarative one.
//! - A [`ConnectionProvider`](traits::ConnectionProvider) hands out database connections. Given a connection URL the
//!   store builds the `sea-orm` backed [`SeaOrmProvider`](driver::SeaOrmProvider) by itself.
//! - A [`Dialect`](dialect::Dialect) renders SQL. It is resolved by the database product name unless given
//!   explicitly.
//!
//! The store operates on the following principles:
//!
//! - Fully async.
//! - Initialization happens lazily, once, on the first operation. A failed initialization is permanent.
//! - Per logical cache, SQL texts are precompiled once into [entry mappings](mapping::EntryMapping).
//! - Outside of a transaction every operation uses its own autocommit connection. Inside one, all operations of the
//!   transaction share a single connection bound to the [`StoreSession`](session::StoreSession) until
//!   [`tx_end`](store::SqlCacheStore::tx_end).
//! - Bulk writes and deletes are batched; full loads of big tables are split into key ranges loaded in parallel.
//!
//! ```ignore
//! let store = SqlCacheStore::builder()
//!     .marshaller(Arc::new(JsonMarshaller::<PersonKey, Person>::new()))
//!     .metadata_provider(Arc::new(metadata) as Arc<dyn TypeMetadataProvider>)
//!     .config(StoreConfig::default().with_connection_url("sqlite://people.db?mode=rwc"))
//!     .build()?;
//!
//! let session = StoreSession::with_transaction(None, Transaction::new("tx-1"));
//! store.write(&session, &key, &person).await?;
//! store.delete(&session, &other_key).await?;
//! store.tx_end(&session, true).await?;
//! ```
//!
//! # Crate Features
//!
//! - `sqlite`, `pg`, `mysql` enable the corresponding `sea-orm` drivers.
//! - `test` exposes the [`test`] module: an in-memory database and a sample model used by the crate's own tests.
//! - `tracing` enables trace-level log records in release builds.

pub mod config;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod mapping;
pub mod marshaller;
pub mod metadata;
pub mod session;
pub mod store;
pub mod traits;
pub mod types;

#[doc(inline)]
pub use error::StoreError;
#[doc(inline)]
pub use store::SqlCacheStore;

pub mod prelude {
    pub use crate::config::StoreConfig;
    pub use crate::dialect::Dialect;
    pub use crate::error::Result;
    pub use crate::error::StoreError;
    pub use crate::marshaller::JsonMarshaller;
    pub use crate::metadata::StaticTypeMetadata;
    pub use crate::session::StoreSession;
    pub use crate::store::SqlCacheStore;
    pub use crate::traits::*;
    pub use crate::types::*;
}
