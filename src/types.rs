use std::fmt::Display;
use std::sync::Arc;

use sea_orm::sea_query::ValueType;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::error::StoreError;

pub use sea_orm::Value;

/// Database column type of a mapped field. Determines how a column is read from a result row and how a `NULL` is
/// bound for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Text,
    Binary,
}

impl DbType {
    /// A typed `NULL` for this column type.
    pub fn null_value(&self) -> Value {
        match self {
            DbType::Boolean => Value::from(None::<bool>),
            DbType::SmallInt => Value::from(None::<i16>),
            DbType::Integer => Value::from(None::<i32>),
            DbType::BigInt => Value::from(None::<i64>),
            DbType::Real => Value::from(None::<f32>),
            DbType::Double => Value::from(None::<f64>),
            DbType::Text => Value::from(None::<String>),
            DbType::Binary => Value::from(None::<Vec<u8>>),
        }
    }
}

/// Binds a field of a key or value object to a database column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name as known to the marshaller.
    pub field:   String,
    /// Database column name.
    pub column:  String,
    pub db_type: DbType,
}

impl FieldDescriptor {
    pub fn new<F: Into<String>, C: Into<String>>(field: F, column: C, db_type: DbType) -> Self {
        Self {
            field: field.into(),
            column: column.into(),
            db_type,
        }
    }

    pub fn column_spec(&self) -> ColumnSpec {
        ColumnSpec {
            name:    self.column.clone(),
            db_type: self.db_type,
        }
    }
}

/// A column the engine expects in a result set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    pub name:    String,
    pub db_type: DbType,
}

/// Declares how one key/value type pair of a logical cache maps onto a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMetadata {
    pub key_type:     String,
    pub value_type:   String,
    #[serde(default)]
    pub schema:       String,
    pub table:        String,
    pub key_fields:   Vec<FieldDescriptor>,
    pub value_fields: Vec<FieldDescriptor>,
}

/// A decoded result row: column name/value pairs in select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }

    pub fn push<S: Into<String>>(&mut self, column: S, value: Value) {
        self.columns.push((column.into(), value));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, v)| v)
    }

    pub fn get_at(&self, idx: usize) -> Option<&Value> {
        self.columns.get(idx).map(|(_, v)| v)
    }

    /// Fetch a column converted to a Rust type. A missing column or a type mismatch are reported as row-mapping
    /// errors against `type_name`.
    pub fn try_get<T: ValueType>(&self, type_name: &str, column: &str) -> Result<T> {
        let value = self.get(column).cloned().ok_or_else(|| StoreError::RowMapping {
            type_name: type_name.to_string(),
            reason:    format!("missing column '{column}'"),
        })?;
        <T as ValueType>::try_from(value).map_err(|_| StoreError::RowMapping {
            type_name: type_name.to_string(),
            reason:    format!("type mismatch for column '{column}'"),
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, v)| v)
    }
}

/// Identifier of an active cache transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transaction {
    xid: Arc<str>,
}

impl Transaction {
    pub fn new<S: AsRef<str>>(xid: S) -> Self {
        Self {
            xid: Arc::from(xid.as_ref()),
        }
    }

    pub fn xid(&self) -> &str {
        &self.xid
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.xid)
    }
}
