//! SQL dialects.
//!
//! A dialect turns table metadata into the SQL texts the store executes. The provided methods of [`Dialect`] produce
//! plain ANSI SQL with `?` placeholders; product dialects override what their database does differently.
pub mod basic;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::fmt::Debug;
use std::sync::Arc;

use tracing::warn;

pub use basic::BasicDialect;
pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

/// Default max query parameters count.
pub const DFLT_MAX_PARAMS_COUNT: usize = 2000;

pub trait Dialect: Debug + Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Max number of positional parameters a single statement may carry.
    fn max_params_count(&self) -> usize {
        DFLT_MAX_PARAMS_COUNT
    }

    /// Whether the database has a native upsert. Without it [`merge_query`](Dialect::merge_query) is never used and
    /// writes update the row first, inserting it when nothing was updated.
    fn has_merge(&self) -> bool {
        false
    }

    /// Placeholder for the `idx`-th parameter of a statement, counting from 1.
    fn placeholder(&self, _idx: usize) -> String {
        "?".to_string()
    }

    /// Filter keeping every Nth row of a `ROW_NUMBER()` numbered subquery.
    fn row_number_filter(&self, placeholder: &str) -> String {
        format!("MOD(rn, {placeholder}) = 0")
    }

    /// Select all rows of the table.
    fn load_cache_query(&self, schema: &str, table: &str, cols: &[String]) -> String {
        format!("SELECT {} FROM {}", cols.join(","), qualified(schema, table))
    }

    /// Select key column values of every Nth row ordered by the key. N is the only parameter.
    fn load_cache_select_range_query(&self, schema: &str, table: &str, key_cols: &[String]) -> String {
        let keys = key_cols.join(",");
        format!(
            "SELECT {keys} FROM (SELECT {keys}, ROW_NUMBER() OVER (ORDER BY {keys}) AS rn FROM {}) tmp WHERE {} ORDER BY \
             {keys}",
            qualified(schema, table),
            self.row_number_filter(&self.placeholder(1)),
        )
    }

    /// Select rows with keys in `[lower, upper)`. Either bound may be absent. Each bound is a tiered disjunction with
    /// its parameters laid out triangularly: the full bound, then the bound without its last column, down to the first
    /// column alone.
    fn load_cache_range_query(
        &self,
        schema: &str,
        table: &str,
        key_cols: &[String],
        cols: &[String],
        lower: bool,
        upper: bool,
    ) -> String {
        let mut idx = 0;
        let mut next = || {
            idx += 1;
            self.placeholder(idx)
        };

        let mut clauses = Vec::with_capacity(2);
        if lower {
            clauses.push(tiered_bound(key_cols, ">=", ">", &mut next));
        }
        if upper {
            clauses.push(tiered_bound(key_cols, "<", "<", &mut next));
        }

        let mut sql = self.load_cache_query(schema, table, cols);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql
    }

    /// Select rows for `key_count` keys.
    fn load_query(&self, schema: &str, table: &str, key_cols: &[String], cols: &[String], key_count: usize) -> String {
        let mut idx = 0;
        let mut next = || {
            idx += 1;
            self.placeholder(idx)
        };

        let condition = if key_cols.len() == 1 {
            let params = (0..key_count).map(|_| next()).collect::<Vec<_>>();
            format!("{} IN ({})", key_cols[0], params.join(","))
        }
        else {
            (0..key_count)
                .map(|_| format!("({})", key_equality(key_cols, &mut next)))
                .collect::<Vec<_>>()
                .join(" OR ")
        };

        format!("{} WHERE {condition}", self.load_cache_query(schema, table, cols))
    }

    fn insert_query(&self, schema: &str, table: &str, key_cols: &[String], val_cols: &[String]) -> String {
        let cols = key_cols.iter().chain(val_cols).cloned().collect::<Vec<_>>();
        let params = (1..=cols.len()).map(|i| self.placeholder(i)).collect::<Vec<_>>();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified(schema, table),
            cols.join(","),
            params.join(",")
        )
    }

    /// Value columns are bound first, key columns follow.
    fn update_query(&self, schema: &str, table: &str, key_cols: &[String], val_cols: &[String]) -> String {
        let mut idx = 0;
        let mut next = || {
            idx += 1;
            self.placeholder(idx)
        };

        let assignments = if val_cols.is_empty() {
            // Nothing to update, but the statement must still report whether the row exists.
            format!("{0} = {0}", key_cols[0])
        }
        else {
            val_cols
                .iter()
                .map(|c| format!("{c} = {}", next()))
                .collect::<Vec<_>>()
                .join(", ")
        };

        format!(
            "UPDATE {} SET {assignments} WHERE {}",
            qualified(schema, table),
            key_equality(key_cols, &mut next)
        )
    }

    /// Native upsert with key columns bound first. `None` when the database has no such statement.
    fn merge_query(&self, _schema: &str, _table: &str, _key_cols: &[String], _val_cols: &[String]) -> Option<String> {
        None
    }

    fn remove_query(&self, schema: &str, table: &str, key_cols: &[String]) -> String {
        let mut idx = 0;
        let mut next = || {
            idx += 1;
            self.placeholder(idx)
        };
        format!(
            "DELETE FROM {} WHERE {}",
            qualified(schema, table),
            key_equality(key_cols, &mut next)
        )
    }
}

/// Pick a dialect by the database product name reported by the connection.
pub fn resolve_for_product_name(product_name: &str) -> Arc<dyn Dialect> {
    match product_name {
        "MySQL" => Arc::new(MySqlDialect),
        "PostgreSQL" => Arc::new(PostgresDialect),
        "SQLite" => Arc::new(SqliteDialect),
        _ => {
            warn!("Unknown database: {product_name}. BasicDialect will be used.");
            Arc::new(BasicDialect)
        }
    }
}

pub(crate) fn qualified(schema: &str, table: &str) -> String {
    if schema.is_empty() {
        table.to_string()
    }
    else {
        format!("{schema}.{table}")
    }
}

pub(crate) fn key_equality(key_cols: &[String], next: &mut impl FnMut() -> String) -> String {
    key_cols
        .iter()
        .map(|c| format!("{c} = {}", next()))
        .collect::<Vec<_>>()
        .join(" AND ")
}

pub(crate) fn on_conflict_upsert(insert: String, key_cols: &[String], val_cols: &[String], excluded: &str) -> String {
    let action = if val_cols.is_empty() {
        "DO NOTHING".to_string()
    }
    else {
        let updates = val_cols
            .iter()
            .map(|c| format!("{c} = {excluded}.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("DO UPDATE SET {updates}")
    };
    format!("{insert} ON CONFLICT ({}) {action}", key_cols.join(","))
}

// Lexicographic comparison of the composite key against a bound, one OR tier per significant prefix length.
fn tiered_bound(key_cols: &[String], full_op: &str, prefix_op: &str, next: &mut impl FnMut() -> String) -> String {
    let n = key_cols.len();
    let tiers = (1..=n)
        .rev()
        .map(|cnt| {
            let op = if cnt == n { full_op } else { prefix_op };
            let mut parts = key_cols[..cnt - 1]
                .iter()
                .map(|c| format!("{c} = {}", next()))
                .collect::<Vec<_>>();
            parts.push(format!("{} {op} {}", key_cols[cnt - 1], next()));
            format!("({})", parts.join(" AND "))
        })
        .collect::<Vec<_>>();
    format!("({})", tiers.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn range_query_with_composite_key() {
        let d = BasicDialect;
        let sql = d.load_cache_range_query("", "orders", &cols(&["a", "b"]), &cols(&["a", "b", "c"]), true, true);
        assert_eq!(
            sql,
            "SELECT a,b,c FROM orders WHERE ((a = ? AND b >= ?) OR (a > ?)) AND ((a = ? AND b < ?) OR (a < ?))"
        );
    }

    #[test]
    fn range_query_with_single_bound() {
        let d = BasicDialect;
        let lower_only = d.load_cache_range_query("s", "t", &cols(&["id"]), &cols(&["id", "v"]), true, false);
        assert_eq!(lower_only, "SELECT id,v FROM s.t WHERE ((id >= ?))");
        let upper_only = d.load_cache_range_query("s", "t", &cols(&["id"]), &cols(&["id", "v"]), false, true);
        assert_eq!(upper_only, "SELECT id,v FROM s.t WHERE ((id < ?))");
        let full = d.load_cache_range_query("s", "t", &cols(&["id"]), &cols(&["id", "v"]), false, false);
        assert_eq!(full, "SELECT id,v FROM s.t");
    }

    #[test]
    fn load_query_forms() {
        let d = BasicDialect;
        assert_eq!(
            d.load_query("", "person", &cols(&["id"]), &cols(&["id", "name"]), 3),
            "SELECT id,name FROM person WHERE id IN (?,?,?)"
        );
        assert_eq!(
            d.load_query("", "orders", &cols(&["a", "b"]), &cols(&["a", "b"]), 2),
            "SELECT a,b FROM orders WHERE (a = ? AND b = ?) OR (a = ? AND b = ?)"
        );
    }

    #[test]
    fn update_binds_values_before_keys() {
        let d = PostgresDialect;
        assert_eq!(
            d.update_query("", "person", &cols(&["id"]), &cols(&["name", "age"])),
            "UPDATE person SET name = $1, age = $2 WHERE id = $3"
        );
    }

    #[test]
    fn boundary_query_numbers_rows() {
        let d = BasicDialect;
        assert_eq!(
            d.load_cache_select_range_query("", "person", &cols(&["id"])),
            "SELECT id FROM (SELECT id, ROW_NUMBER() OVER (ORDER BY id) AS rn FROM person) tmp WHERE MOD(rn, ?) = 0 \
             ORDER BY id"
        );
    }

    #[test]
    fn merge_support_by_product() {
        assert!(!resolve_for_product_name("Informix").has_merge());
        assert_eq!(resolve_for_product_name("Informix").name(), "basic");
        assert!(resolve_for_product_name("MySQL").has_merge());
        assert!(resolve_for_product_name("PostgreSQL").has_merge());
        assert!(resolve_for_product_name("SQLite").has_merge());
        assert!(BasicDialect.merge_query("", "t", &cols(&["id"]), &cols(&["v"])).is_none());
    }

    #[test]
    fn delete_by_composite_key() {
        assert_eq!(
            BasicDialect.remove_query("shop", "orders", &cols(&["a", "b"])),
            "DELETE FROM shop.orders WHERE a = ? AND b = ?"
        );
    }
}
