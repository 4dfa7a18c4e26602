use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn max_params_count(&self) -> usize {
        u16::MAX as usize
    }

    fn has_merge(&self) -> bool {
        true
    }

    fn placeholder(&self, idx: usize) -> String {
        format!("${idx}")
    }

    fn merge_query(&self, schema: &str, table: &str, key_cols: &[String], val_cols: &[String]) -> Option<String> {
        Some(super::on_conflict_upsert(
            self.insert_query(schema, table, key_cols, val_cols),
            key_cols,
            val_cols,
            "EXCLUDED",
        ))
    }
}
