use async_trait::async_trait;
use std::collections::HashSet;

use crate::context::OpContext;
use crate::entry::Entry;
use crate::error::LogError;
use crate::log::{EntryLog, Row, Value};
use crate::query::{Projection, Select, Statement};

/// Ephemeral entry log held in insertion order
///
/// Nothing survives the log being dropped.
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Vec<Entry>,
    closed: bool,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries held (including stale ones)
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.closed {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    fn admitted<'a>(&'a self, select: &'a Select) -> impl Iterator<Item = &'a Entry> + 'a {
        self.entries.iter().filter(move |entry| select.admits(entry))
    }
}

fn count(n: usize) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

#[async_trait]
impl EntryLog for MemoryLog {
    async fn execute(&mut self, ctx: &OpContext, statement: &Statement) -> Result<u64, LogError> {
        self.ensure_open()?;
        // Nothing below awaits, so the change lands whole or not at all
        ctx.check()?;

        match statement {
            Statement::Insert(entry) => {
                self.entries.push(entry.clone());
                Ok(1)
            }
            Statement::Delete(predicates) => {
                let before = self.entries.len();
                self.entries
                    .retain(|entry| !predicates.iter().all(|predicate| predicate.eval(entry)));
                Ok((before - self.entries.len()) as u64)
            }
        }
    }

    async fn query_rows(&self, select: &Select) -> Result<Vec<Row>, LogError> {
        self.ensure_open()?;
        let Projection::Values { column, distinct } = select.projection else {
            return Err(LogError::Schema(format!(
                "{:?} does not produce rows",
                select.projection
            )));
        };

        let mut seen = HashSet::new();
        let rows = self
            .admitted(select)
            .map(|entry| column.value(entry))
            .filter(|value| !distinct || seen.insert(*value))
            .map(|value| vec![Value::Text(value.to_string())])
            .collect();

        Ok(rows)
    }

    async fn query_scalar(&self, select: &Select) -> Result<Value, LogError> {
        self.ensure_open()?;
        let admitted = self.admitted(select);

        let n = match select.projection {
            Projection::Count {
                distinct: false, ..
            }
            | Projection::CountPairs { distinct: false } => admitted.count(),
            Projection::Count { column, distinct: true } => admitted
                .map(|entry| column.value(entry))
                .collect::<HashSet<_>>()
                .len(),
            Projection::CountPairs { distinct: true } => admitted
                .map(|entry| (entry.namespace(), entry.key()))
                .collect::<HashSet<_>>()
                .len(),
            Projection::Values { .. } => {
                return Err(LogError::Schema(format!(
                    "{:?} does not produce a scalar",
                    select.projection
                )))
            }
        };

        Ok(count(n))
    }

    async fn close(&mut self) -> Result<(), LogError> {
        self.closed = true;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Timestamp;
    use crate::query;
    use std::time::Duration;

    const EXPIRED: Timestamp = Timestamp::from_millis(500);
    const LIVE: Timestamp = Timestamp::from_millis(5_000);
    const NOW: Timestamp = Timestamp::from_millis(1_000);

    async fn seeded() -> MemoryLog {
        let mut log = MemoryLog::new();
        for (namespace, key, expiration) in [
            ("default", "key0", LIVE),
            ("default", "key0", LIVE),
            ("default", "key1", EXPIRED),
            ("other", "key0", LIVE),
        ] {
            log.execute(&bg(), &query::put(Entry::new(namespace, key, expiration)))
                .await
                .unwrap();
        }
        log
    }

    fn bg() -> OpContext {
        OpContext::background()
    }

    fn texts(rows: Vec<Row>) -> Vec<String> {
        crate::log::single_text_column(rows).unwrap()
    }

    #[tokio::test]
    async fn test_insert_appends() {
        let log = seeded().await;
        assert_eq!(log.len(), 4);
        assert!(!log.is_empty());
    }

    #[tokio::test]
    async fn test_rows_keep_storage_order() {
        let log = seeded().await;

        let all = log.query_rows(&query::get_keys("default", false, false, NOW)).await.unwrap();
        assert_eq!(texts(all), vec!["key0", "key0", "key1"]);

        let unique = log.query_rows(&query::get_keys("default", false, true, NOW)).await.unwrap();
        assert_eq!(texts(unique), vec!["key0", "key1"]);

        let active = log.query_rows(&query::get_keys("default", true, false, NOW)).await.unwrap();
        assert_eq!(texts(active), vec!["key0", "key0"]);
    }

    #[tokio::test]
    async fn test_scalar_counts() {
        let log = seeded().await;

        for (select, expected) in [
            (query::count_key("default", "key0", true, NOW), 2),
            (query::count_keys("default", false, false, NOW), 3),
            (query::count_keys("default", false, true, NOW), 2),
            (query::count_namespaces(false, NOW), 2),
            (query::count_entries(true, false, NOW), 3),
            (query::count_entries(false, true, NOW), 3),
        ] {
            let count = log.query_scalar(&select).await.unwrap();
            assert_eq!(count, Value::Integer(expected), "{select:?}");
        }
    }

    #[tokio::test]
    async fn test_prune_and_clear() {
        let mut log = seeded().await;

        let pruned = log.execute(&bg(), &query::prune_entries(NOW)).await.unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(log.len(), 3);

        let cleared = log.execute(&bg(), &query::clear_entries()).await.unwrap();
        assert_eq!(cleared, 3);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_projection_mismatch_is_schema_error() {
        let log = seeded().await;

        let rows = log.query_rows(&query::count_entries(false, false, NOW)).await;
        assert!(matches!(rows, Err(LogError::Schema(_))));

        let scalar = log.query_scalar(&query::get_namespaces(false, NOW)).await;
        assert!(matches!(scalar, Err(LogError::Schema(_))));
    }

    #[tokio::test]
    async fn test_fired_context_leaves_log_untouched() {
        let mut log = seeded().await;
        let (ctx, handle) = OpContext::cancellable();
        handle.cancel();

        let put = log.execute(&ctx, &query::put(Entry::new("default", "key2", LIVE))).await;
        assert!(matches!(put, Err(LogError::Cancelled)));

        let clear = log
            .execute(&OpContext::with_timeout(Duration::ZERO), &query::clear_entries())
            .await;
        assert!(matches!(clear, Err(LogError::DeadlineExceeded)));
        assert_eq!(log.len(), 4);
    }

    #[tokio::test]
    async fn test_closed_log_rejects_every_call() {
        let mut log = seeded().await;
        log.close().await.unwrap();

        let put = log.execute(&bg(), &query::put(Entry::new("default", "key2", LIVE))).await;
        assert!(matches!(put, Err(LogError::Closed)));
        let rows = log.query_rows(&query::get_keys("default", false, false, NOW)).await;
        assert!(matches!(rows, Err(LogError::Closed)));
        let count = log.query_scalar(&query::count_entries(false, false, NOW)).await;
        assert!(matches!(count, Err(LogError::Closed)));

        // Closing again is harmless
        log.close().await.unwrap();
    }
}
