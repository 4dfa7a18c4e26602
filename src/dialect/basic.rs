use super::Dialect;

/// Plain ANSI SQL. Used for databases without a dedicated dialect; writes fall back to update-then-insert.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicDialect;

impl Dialect for BasicDialect {
    fn name(&self) -> &'static str {
        "basic"
    }
}
