use super::Dialect;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn max_params_count(&self) -> usize {
        u16::MAX as usize
    }

    fn has_merge(&self) -> bool {
        true
    }

    fn merge_query(&self, schema: &str, table: &str, key_cols: &[String], val_cols: &[String]) -> Option<String> {
        let insert = self.insert_query(schema, table, key_cols, val_cols);

        Some(if val_cols.is_empty() {
            insert.replacen("INSERT INTO", "INSERT IGNORE INTO", 1)
        }
        else {
            let updates = val_cols
                .iter()
                .map(|c| format!("{c} = VALUES({c})"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{insert} ON DUPLICATE KEY UPDATE {updates}")
        })
    }
}
