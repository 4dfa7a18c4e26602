//! A small shop model: people and their orders, stored in two tables of [`MemDatabase`].
use async_trait::async_trait;
use std::fmt::Display;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::mem_db::MemDatabase;
use super::mem_dialect::MemDialect;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::error::StoreError;
use crate::metadata::StaticTypeMetadata;
use crate::store::SqlCacheStore;
use crate::traits::Marshaller;
use crate::traits::TypeMetadataProvider;
use crate::types::DbType;
use crate::types::FieldDescriptor;
use crate::types::Row;
use crate::types::TypeMetadata;
use crate::types::Value;

pub const PERSON_KEY: &str = "PersonKey";
pub const PERSON: &str = "Person";
pub const ORDER_KEY: &str = "OrderKey";
pub const ORDER: &str = "Order";

/// Name of the logical cache holding both types besides the default one.
pub const SHOP_CACHE: &str = "shop";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShopKey {
    Person(i32),
    Order { customer: i32, line: i32 },
}

impl Display for ShopKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShopKey::Person(id) => write!(f, "Person#{id}"),
            ShopKey::Order { customer, line } => write!(f, "Order#{customer}/{line}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id:   i32,
    pub name: String,
    pub age:  Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub customer: i32,
    pub line:     i32,
    pub item:     String,
    pub qty:      i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShopValue {
    Person(Person),
    Order(Order),
}

pub fn person(id: i32, name: &str, age: Option<i32>) -> (ShopKey, ShopValue) {
    (
        ShopKey::Person(id),
        ShopValue::Person(Person {
            id,
            name: name.to_string(),
            age,
        }),
    )
}

pub fn order(customer: i32, line: i32, item: &str, qty: i64) -> (ShopKey, ShopValue) {
    (
        ShopKey::Order { customer, line },
        ShopValue::Order(Order {
            customer,
            line,
            item: item.to_string(),
            qty,
        }),
    )
}

pub fn person_metadata() -> TypeMetadata {
    TypeMetadata {
        key_type:     PERSON_KEY.into(),
        value_type:   PERSON.into(),
        schema:       String::new(),
        table:        "person".into(),
        key_fields:   vec![FieldDescriptor::new("id", "id", DbType::Integer)],
        value_fields: vec![
            FieldDescriptor::new("id", "id", DbType::Integer),
            FieldDescriptor::new("name", "name", DbType::Text),
            FieldDescriptor::new("age", "age", DbType::Integer),
        ],
    }
}

pub fn order_metadata() -> TypeMetadata {
    TypeMetadata {
        key_type:     ORDER_KEY.into(),
        value_type:   ORDER.into(),
        schema:       String::new(),
        table:        "orders".into(),
        key_fields:   vec![
            FieldDescriptor::new("customer", "customer_id", DbType::Integer),
            FieldDescriptor::new("line", "line_no", DbType::Integer),
        ],
        value_fields: vec![
            FieldDescriptor::new("customer", "customer_id", DbType::Integer),
            FieldDescriptor::new("line", "line_no", DbType::Integer),
            FieldDescriptor::new("item", "item", DbType::Text),
            FieldDescriptor::new("qty", "qty", DbType::BigInt),
        ],
    }
}

pub fn shop_metadata() -> StaticTypeMetadata {
    let types = vec![person_metadata(), order_metadata()];
    StaticTypeMetadata::from_default(types.clone()).with_cache(SHOP_CACHE, types)
}

pub fn create_shop_tables(db: &MemDatabase) {
    db.create_table("person", &["id"], &["name", "age"]);
    db.create_table("orders", &["customer_id", "line_no"], &["item", "qty"]);
}

fn no_field(type_name: &str, field: &FieldDescriptor) -> StoreError {
    StoreError::FieldExtraction {
        type_name: type_name.to_string(),
        field:     field.field.clone(),
        reason:    "no such field".to_string(),
    }
}

fn column<'a>(type_name: &str, fields: &'a [FieldDescriptor], field: &str) -> Result<&'a str> {
    fields
        .iter()
        .find(|f| f.field == field)
        .map(|f| f.column.as_str())
        .ok_or_else(|| StoreError::RowMapping {
            type_name: type_name.to_string(),
            reason:    format!("no descriptor for field '{field}'"),
        })
}

#[derive(Debug, Default)]
pub struct ShopMarshaller {
    type_cache_builds: AtomicUsize,
}

impl ShopMarshaller {
    pub fn type_cache_builds(&self) -> usize {
        self.type_cache_builds.load(Ordering::SeqCst)
    }
}

impl Marshaller for ShopMarshaller {
    type Key = ShopKey;
    type KeyId = &'static str;
    type Value = ShopValue;

    fn extract_key_field(&self, type_name: &str, field: &FieldDescriptor, key: &ShopKey) -> Result<Option<Value>> {
        Ok(Some(match (key, field.field.as_str()) {
            (ShopKey::Person(id), "id") => Value::from(*id),
            (ShopKey::Order { customer, .. }, "customer") => Value::from(*customer),
            (ShopKey::Order { line, .. }, "line") => Value::from(*line),
            _ => return Err(no_field(type_name, field)),
        }))
    }

    fn extract_value_field(
        &self,
        type_name: &str,
        field: &FieldDescriptor,
        value: &ShopValue,
    ) -> Result<Option<Value>> {
        Ok(match (value, field.field.as_str()) {
            (ShopValue::Person(p), "id") => Some(Value::from(p.id)),
            (ShopValue::Person(p), "name") => Some(Value::from(p.name.clone())),
            (ShopValue::Person(p), "age") => p.age.map(Value::from),
            (ShopValue::Order(o), "customer") => Some(Value::from(o.customer)),
            (ShopValue::Order(o), "line") => Some(Value::from(o.line)),
            (ShopValue::Order(o), "item") => Some(Value::from(o.item.clone())),
            (ShopValue::Order(o), "qty") => Some(Value::from(o.qty)),
            _ => return Err(no_field(type_name, field)),
        })
    }

    fn build_key(&self, type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<ShopKey> {
        match type_name {
            PERSON_KEY => Ok(ShopKey::Person(row.try_get(type_name, column(type_name, fields, "id")?)?)),
            ORDER_KEY => Ok(ShopKey::Order {
                customer: row.try_get(type_name, column(type_name, fields, "customer")?)?,
                line:     row.try_get(type_name, column(type_name, fields, "line")?)?,
            }),
            _ => Err(StoreError::RowMapping {
                type_name: type_name.to_string(),
                reason:    "unknown key type".to_string(),
            }),
        }
    }

    fn build_value(&self, type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<ShopValue> {
        match type_name {
            PERSON => Ok(ShopValue::Person(Person {
                id:   row.try_get(type_name, column(type_name, fields, "id")?)?,
                name: row.try_get(type_name, column(type_name, fields, "name")?)?,
                age:  row.try_get(type_name, column(type_name, fields, "age")?)?,
            })),
            ORDER => Ok(ShopValue::Order(Order {
                customer: row.try_get(type_name, column(type_name, fields, "customer")?)?,
                line:     row.try_get(type_name, column(type_name, fields, "line")?)?,
                item:     row.try_get(type_name, column(type_name, fields, "item")?)?,
                qty:      row.try_get(type_name, column(type_name, fields, "qty")?)?,
            })),
            _ => Err(StoreError::RowMapping {
                type_name: type_name.to_string(),
                reason:    "unknown value type".to_string(),
            }),
        }
    }

    fn key_id(&self, _cache_name: Option<&str>, key: &ShopKey) -> Result<&'static str> {
        Ok(match key {
            ShopKey::Person(_) => PERSON_KEY,
            ShopKey::Order { .. } => ORDER_KEY,
        })
    }

    fn key_id_for_type(&self, type_name: &str) -> Result<&'static str> {
        match type_name {
            PERSON_KEY => Ok(PERSON_KEY),
            ORDER_KEY => Ok(ORDER_KEY),
            _ => Err(StoreError::InvalidMapping {
                type_name: type_name.to_string(),
                reason:    "unknown key type".to_string(),
            }),
        }
    }

    fn build_type_cache(&self, _cache_name: Option<&str>, _types: &[TypeMetadata]) -> Result<()> {
        self.type_cache_builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Metadata provider counting its calls, optionally slow to answer.
#[derive(Debug)]
pub struct CountingMetadata {
    inner: StaticTypeMetadata,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingMetadata {
    pub fn new(inner: StaticTypeMetadata, delay: Duration) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TypeMetadataProvider for CountingMetadata {
    async fn type_metadata(&self, cache_name: Option<&str>) -> Result<Vec<TypeMetadata>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.type_metadata(cache_name).await
    }
}

/// A store over a fresh [`MemDatabase`] with the shop tables.
pub struct ShopFixture {
    pub db:         Arc<MemDatabase>,
    pub marshaller: Arc<ShopMarshaller>,
    pub metadata:   Arc<CountingMetadata>,
    pub store:      Arc<SqlCacheStore<ShopMarshaller>>,
}

impl ShopFixture {
    pub fn new(dialect: MemDialect, config: StoreConfig) -> Self {
        Self::with_metadata_delay(dialect, config, Duration::ZERO)
    }

    pub fn with_metadata_delay(dialect: MemDialect, config: StoreConfig, delay: Duration) -> Self {
        let db = MemDatabase::new("MemDB");
        create_shop_tables(&db);

        let marshaller = Arc::new(ShopMarshaller::default());
        let metadata = Arc::new(CountingMetadata::new(shop_metadata(), delay));

        let store = SqlCacheStore::builder()
            .marshaller(marshaller.clone())
            .metadata_provider(metadata.clone() as Arc<dyn TypeMetadataProvider>)
            .data_source(db.provider() as Arc<dyn crate::traits::ConnectionProvider>)
            .dialect(Arc::new(dialect) as Arc<dyn crate::dialect::Dialect>)
            .config(config)
            .build()
            .expect("shop store");

        Self {
            db,
            marshaller,
            metadata,
            store,
        }
    }

    /// Put `count` people with ids `1..=count` straight into the database.
    pub fn seed_people(&self, count: i32) {
        for id in 1..=count {
            self.db.put_row(
                "person",
                vec![Value::from(id)],
                vec![Value::from(format!("Person {id}")), Value::from(20 + id % 50)],
            );
        }
    }

    /// Put `customers * lines` orders straight into the database.
    pub fn seed_orders(&self, customers: i32, lines: i32) {
        for customer in 1..=customers {
            for line in 1..=lines {
                self.db.put_row(
                    "orders",
                    vec![Value::from(customer), Value::from(line)],
                    vec![Value::from(format!("item {customer}/{line}")), Value::from(i64::from(line))],
                );
            }
        }
    }
}
