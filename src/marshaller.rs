//! Marshaller for `serde` types.
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::error::Result;
use crate::error::StoreError;
use crate::mapping::cache_display_name;
use crate::traits::Marshaller;
use crate::types::DbType;
use crate::types::FieldDescriptor;
use crate::types::Row;
use crate::types::TypeMetadata;
use crate::types::Value;

/// Marshaller for keys and values implementing `Serialize` and `Deserialize`.
///
/// Objects are moved through `serde_json` objects whose members are the descriptor field names. A cache holding
/// several types uses externally tagged enums for keys and values: the variant name is the type name declared in
/// [`TypeMetadata`], the variant payload carries the fields. Keys that are not tagged by a declared key type belong
/// to the only key type declared for their logical cache.
///
/// A key or value serializing to a scalar is accepted for types with exactly one field.
pub struct JsonMarshaller<K, V> {
    /// Declared key types per logical cache.
    key_types: RwLock<HashMap<Option<String>, HashSet<String>>>,
    _types:    PhantomData<fn() -> (K, V)>,
}

impl<K, V> JsonMarshaller<K, V> {
    pub fn new() -> Self {
        Self {
            key_types: RwLock::new(HashMap::new()),
            _types:    PhantomData,
        }
    }

    /// Key type of an untagged key: the only one declared for the cache.
    fn sole_key_type(&self, cache_name: Option<&str>) -> Option<String> {
        let key_types = self.key_types.read();
        let declared = key_types.get(&cache_name.map(str::to_string))?;
        match declared.len() {
            1 => declared.iter().next().cloned(),
            _ => None,
        }
    }

    fn is_key_type(&self, cache_name: Option<&str>, type_name: &str) -> bool {
        self.key_types
            .read()
            .get(&cache_name.map(str::to_string))
            .is_some_and(|declared| declared.contains(type_name))
    }
}

impl<K, V> Default for JsonMarshaller<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Debug for JsonMarshaller<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonMarshaller")
            .field("key_types", &*self.key_types.read())
            .finish()
    }
}

fn extraction_error(type_name: &str, field: &str, reason: impl Display) -> StoreError {
    StoreError::FieldExtraction {
        type_name: type_name.to_string(),
        field:     field.to_string(),
        reason:    reason.to_string(),
    }
}

fn mapping_error(type_name: &str, reason: impl Display) -> StoreError {
    StoreError::RowMapping {
        type_name: type_name.to_string(),
        reason:    reason.to_string(),
    }
}

/// Single-member object `{tag: payload}`.
fn tagged(json: &Json) -> Option<(&str, &Json)> {
    match json {
        Json::Object(map) if map.len() == 1 => map.iter().next().map(|(tag, payload)| (tag.as_str(), payload)),
        _ => None,
    }
}

/// Payload carrying the fields of `type_name`.
fn payload<'a>(type_name: &str, json: &'a Json) -> &'a Json {
    match tagged(json) {
        Some((tag, payload)) if tag == type_name => payload,
        _ => json,
    }
}

fn field_of(type_name: &str, field: &FieldDescriptor, json: &Json) -> Result<Option<Value>> {
    let member = match payload(type_name, json) {
        Json::Object(map) => map
            .get(&field.field)
            .ok_or_else(|| extraction_error(type_name, &field.field, "no such field"))?,
        scalar => scalar,
    };
    json_to_value(member, field.db_type).map_err(|reason| extraction_error(type_name, &field.field, reason))
}

fn json_to_value(json: &Json, db_type: DbType) -> std::result::Result<Option<Value>, String> {
    let mismatch = || format!("cannot bind {json} as {db_type:?}");
    Ok(Some(match (db_type, json) {
        (_, Json::Null) => return Ok(None),
        (DbType::Boolean, Json::Bool(b)) => Value::from(*b),
        (DbType::SmallInt, Json::Number(n)) => {
            Value::from(n.as_i64().and_then(|n| i16::try_from(n).ok()).ok_or_else(mismatch)?)
        }
        (DbType::Integer, Json::Number(n)) => {
            Value::from(n.as_i64().and_then(|n| i32::try_from(n).ok()).ok_or_else(mismatch)?)
        }
        (DbType::BigInt, Json::Number(n)) => Value::from(n.as_i64().ok_or_else(mismatch)?),
        (DbType::Real, Json::Number(n)) => Value::from(n.as_f64().ok_or_else(mismatch)? as f32),
        (DbType::Double, Json::Number(n)) => Value::from(n.as_f64().ok_or_else(mismatch)?),
        (DbType::Text, Json::String(s)) => Value::from(s.clone()),
        (DbType::Binary, Json::Array(bytes)) => Value::from(
            bytes
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(mismatch)?,
        ),
        _ => return Err(mismatch()),
    }))
}

fn value_to_json(value: &Value) -> std::result::Result<Json, String> {
    Ok(match value {
        Value::Bool(b) => Json::from(*b),
        Value::TinyInt(n) => Json::from(*n),
        Value::SmallInt(n) => Json::from(*n),
        Value::Int(n) => Json::from(*n),
        Value::BigInt(n) => Json::from(*n),
        Value::TinyUnsigned(n) => Json::from(*n),
        Value::SmallUnsigned(n) => Json::from(*n),
        Value::Unsigned(n) => Json::from(*n),
        Value::BigUnsigned(n) => Json::from(*n),
        Value::Float(n) => n.map_or(Json::Null, |n| Json::from(n as f64)),
        Value::Double(n) => n.map_or(Json::Null, Json::from),
        Value::String(s) => s.as_ref().map_or(Json::Null, |s| Json::from(s.to_string())),
        Value::Bytes(b) => b
            .as_ref()
            .map_or(Json::Null, |b| Json::Array(b.iter().map(|b| Json::from(*b)).collect())),
        other => return Err(format!("unsupported column value {other:?}")),
    })
}

fn row_object(type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<Json> {
    let mut object = Map::with_capacity(fields.len());
    for field in fields {
        let value = row
            .get(&field.column)
            .ok_or_else(|| mapping_error(type_name, format!("missing column '{}'", field.column)))?;
        object.insert(
            field.field.clone(),
            value_to_json(value).map_err(|reason| mapping_error(type_name, reason))?,
        );
    }
    Ok(Json::Object(object))
}

/// Deserialize the first form that fits: tagged by `type_name`, the plain object, the lone field.
fn from_row<T: DeserializeOwned>(type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<T> {
    let object = row_object(type_name, fields, row)?;

    let mut wrapped = Map::with_capacity(1);
    wrapped.insert(type_name.to_string(), object.clone());
    if let Ok(obj) = serde_json::from_value(Json::Object(wrapped)) {
        return Ok(obj);
    }

    let lone = match (&object, fields) {
        (Json::Object(map), [field]) => map.get(&field.field).cloned(),
        _ => None,
    };

    match serde_json::from_value(object) {
        Ok(obj) => Ok(obj),
        Err(err) => match lone {
            Some(lone) => serde_json::from_value(lone).map_err(|e| mapping_error(type_name, e)),
            None => Err(mapping_error(type_name, err)),
        },
    }
}

fn to_json<T: Serialize>(type_name: &str, field: &str, obj: &T) -> Result<Json> {
    serde_json::to_value(obj).map_err(|e| extraction_error(type_name, field, e))
}

impl<K, V> Marshaller for JsonMarshaller<K, V>
where
    K: Serialize + DeserializeOwned + Debug + Display + Hash + Clone + Eq + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + 'static,
{
    type Key = K;
    type KeyId = String;
    type Value = V;

    fn extract_key_field(&self, type_name: &str, field: &FieldDescriptor, key: &K) -> Result<Option<Value>> {
        field_of(type_name, field, &to_json(type_name, &field.field, key)?)
    }

    fn extract_value_field(&self, type_name: &str, field: &FieldDescriptor, value: &V) -> Result<Option<Value>> {
        field_of(type_name, field, &to_json(type_name, &field.field, value)?)
    }

    fn build_key(&self, type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<K> {
        from_row(type_name, fields, row)
    }

    fn build_value(&self, type_name: &str, fields: &[FieldDescriptor], row: &Row) -> Result<V> {
        from_row(type_name, fields, row)
    }

    fn key_id(&self, cache_name: Option<&str>, key: &K) -> Result<String> {
        let json = to_json("<key>", "", key)?;
        if let Some((tag, _)) = tagged(&json) {
            if self.is_key_type(cache_name, tag) {
                return Ok(tag.to_string());
            }
        }

        self.sole_key_type(cache_name).ok_or_else(|| StoreError::MappingNotFound {
            key:   key.to_string(),
            cache: cache_display_name(cache_name).to_string(),
        })
    }

    fn key_id_for_type(&self, type_name: &str) -> Result<String> {
        Ok(type_name.to_string())
    }

    fn build_type_cache(&self, cache_name: Option<&str>, types: &[TypeMetadata]) -> Result<()> {
        let mut value_types = HashMap::with_capacity(types.len());
        for meta in types {
            if let Some(other) = value_types.insert(&meta.key_type, &meta.value_type) {
                if other != &meta.value_type {
                    return Err(StoreError::InvalidMapping {
                        type_name: meta.key_type.clone(),
                        reason:    format!("mapped to both '{other}' and '{}'", meta.value_type),
                    });
                }
            }
        }

        self.key_types.write().insert(
            cache_name.map(str::to_string),
            types.iter().map(|meta| meta.key_type.clone()).collect(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
    enum Key {
        PersonKey { id: i32 },
        OrderKey { customer: i32, line: i32 },
    }

    impl Display for Key {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id:   i32,
        name: String,
        age:  Option<i32>,
    }

    fn person_fields() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("id", "id", DbType::Integer),
            FieldDescriptor::new("name", "full_name", DbType::Text),
            FieldDescriptor::new("age", "age", DbType::Integer),
        ]
    }

    fn metadata(key_type: &str, value_type: &str) -> TypeMetadata {
        TypeMetadata {
            key_type:     key_type.into(),
            value_type:   value_type.into(),
            schema:       String::new(),
            table:        "t".into(),
            key_fields:   vec![],
            value_fields: vec![],
        }
    }

    #[test]
    fn tagged_keys_select_their_type() {
        let m = JsonMarshaller::<Key, Person>::new();
        m.build_type_cache(None, &[metadata("PersonKey", "Person"), metadata("OrderKey", "Order")])
            .unwrap();

        assert_eq!(m.key_id(None, &Key::PersonKey { id: 1 }).unwrap(), "PersonKey");
        assert_eq!(m.key_id(None, &Key::OrderKey { customer: 1, line: 2 }).unwrap(), "OrderKey");

        let customer = FieldDescriptor::new("customer", "customer_id", DbType::Integer);
        assert_eq!(
            m.extract_key_field("OrderKey", &customer, &Key::OrderKey { customer: 7, line: 2 })
                .unwrap(),
            Some(Value::from(7))
        );
    }

    #[test]
    fn value_fields_and_rows() {
        let m = JsonMarshaller::<i32, Person>::new();
        m.build_type_cache(None, &[metadata("int", "Person")]).unwrap();

        let person = Person {
            id:   3,
            name: "Ann".into(),
            age:  None,
        };
        let fields = person_fields();
        assert_eq!(
            m.extract_value_field("Person", &fields[1], &person).unwrap(),
            Some(Value::from("Ann".to_string()))
        );
        assert_eq!(m.extract_value_field("Person", &fields[2], &person).unwrap(), None);

        let row = Row::new(vec![
            ("id".into(), Value::from(3)),
            ("full_name".into(), Value::from("Ann".to_string())),
            ("age".into(), Value::from(None::<i32>)),
        ]);
        assert_eq!(m.build_value("Person", &fields, &row).unwrap(), person);

        let key_field = [FieldDescriptor::new("id", "id", DbType::Integer)];
        assert_eq!(m.extract_key_field("int", &key_field[0], &3).unwrap(), Some(Value::from(3)));
        assert_eq!(m.build_key("int", &key_field, &row).unwrap(), 3);
        assert_eq!(m.key_id(None, &3).unwrap(), "int");
    }

    #[test]
    fn key_types_are_kept_per_cache() {
        let m = JsonMarshaller::<i32, Person>::new();
        m.build_type_cache(Some("people"), &[metadata("PersonKey", "Person")])
            .unwrap();
        assert_eq!(m.key_id(Some("people"), &1).unwrap(), "PersonKey");

        m.build_type_cache(Some("archive"), &[metadata("ArchivedKey", "Person")])
            .unwrap();
        assert_eq!(m.key_id(Some("archive"), &1).unwrap(), "ArchivedKey");
        assert_eq!(m.key_id(Some("people"), &1).unwrap(), "PersonKey");

        assert!(matches!(
            m.key_id(None, &1),
            Err(StoreError::MappingNotFound { cache, .. }) if cache == "<default>"
        ));
    }

    #[test]
    fn type_mismatch_is_reported() {
        let m = JsonMarshaller::<i32, Person>::new();
        let wrong = FieldDescriptor::new("name", "full_name", DbType::BigInt);
        let person = Person {
            id:   1,
            name: "Bob".into(),
            age:  Some(40),
        };
        assert!(matches!(
            m.extract_value_field("Person", &wrong, &person),
            Err(StoreError::FieldExtraction { .. })
        ));
    }

    #[test]
    fn conflicting_value_types() {
        let m = JsonMarshaller::<i32, Person>::new();
        assert!(m
            .build_type_cache(None, &[metadata("int", "Person"), metadata("int", "Order")])
            .is_err());
    }
}
