use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    // SQLITE_MAX_VARIABLE_NUMBER of builds older than 3.32.
    fn max_params_count(&self) -> usize {
        999
    }

    fn has_merge(&self) -> bool {
        true
    }

    fn row_number_filter(&self, placeholder: &str) -> String {
        format!("rn % {placeholder} = 0")
    }

    fn merge_query(&self, schema: &str, table: &str, key_cols: &[String], val_cols: &[String]) -> Option<String> {
        Some(super::on_conflict_upsert(
            self.insert_query(schema, table, key_cols, val_cols),
            key_cols,
            val_cols,
            "excluded",
        ))
    }
}
