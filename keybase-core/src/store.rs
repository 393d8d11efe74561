use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::config::{KeybaseConfig, Storage, DEFAULT_TTL};
use crate::context::OpContext;
use crate::entry::{Entry, Timestamp};
use crate::error::{KeybaseError, LogError, Operation};
use crate::log::{single_text_column, EntryLog, MemoryLog, SqliteLog};
use crate::query::{self, Pattern, Select, Statement};

/// Truncates a key or namespace for logging
fn truncate_for_log(value: &str) -> String {
    const MAX_LOG_LEN: usize = 16;
    match value.char_indices().nth(MAX_LOG_LEN) {
        Some((cut, _)) => format!("{}...", &value[..cut]),
        None => value.to_string(),
    }
}

/// Internal shared state for the keybase
struct KeybaseInner {
    /// Entry log behind the reader/writer guard; `&mut` access only under the write lock
    log: RwLock<Box<dyn EntryLog>>,
    ttl: Duration,
}

/// Namespaced key-counting cache with TTL entries
///
/// Every [`put`](Keybase::put) records one more occurrence of a key; queries
/// count or list those occurrences, optionally only the ones still active
/// and optionally deduplicated.
///
/// Writes (`put`, `prune_entries`, `clear_entries`) hold the log exclusively.
/// Reads share it. Each call captures its snapshot timestamp before waiting
/// for the lock, so callers racing for the lock still see their own call time.
///
/// Clones share the same log.
///
/// # Example
///
/// ```rust,no_run
/// use keybase_core::{Keybase, KeybaseConfig, OpContext};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), keybase_core::KeybaseError> {
///     let config = KeybaseConfig::default().with_ttl(Duration::from_secs(30));
///     let keybase = Keybase::open(config).await?;
///     let ctx = OpContext::background();
///
///     keybase.put(&ctx, "logins", "alice").await?;
///     keybase.put(&ctx, "logins", "alice").await?;
///
///     assert_eq!(keybase.count_key(&ctx, "logins", "alice", true).await?, 2);
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Keybase {
    inner: Arc<KeybaseInner>,
}

impl Keybase {
    /// Creates an in-memory keybase with the default TTL
    pub fn new() -> Self {
        Self::with_log(MemoryLog::new(), DEFAULT_TTL)
    }

    /// Creates a keybase over an existing log
    pub fn with_log(log: impl EntryLog + 'static, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(KeybaseInner {
                log: RwLock::new(Box::new(log)),
                ttl,
            }),
        }
    }

    /// Opens the storage named by `config`
    ///
    /// A file-backed store is created when absent and reuses any entries
    /// already in it.
    pub async fn open(config: KeybaseConfig) -> Result<Self, KeybaseError> {
        let keybase = match &config.storage {
            Storage::Memory => Self::with_log(MemoryLog::new(), config.ttl),
            Storage::File(path) => {
                let log = SqliteLog::open(path)
                    .await
                    .map_err(|source| Self::fail(Operation::Open, source))?;
                Self::with_log(log, config.ttl)
            }
        };

        tracing::info!(
            "keybase opened ({:?}, ttl: {}ms)",
            config.storage,
            config.ttl.as_millis()
        );
        Ok(keybase)
    }

    /// Releases the storage handle
    ///
    /// Waits for in-flight operations to finish first. Every later call on
    /// this keybase or its clones fails with [`ErrorKind::Closed`](crate::ErrorKind::Closed).
    pub async fn close(&self) -> Result<(), KeybaseError> {
        let mut log = self.inner.log.write().await;
        let backend = log.backend();
        log.close()
            .await
            .map_err(|source| Self::fail(Operation::Close, source))?;
        tracing::info!("keybase closed ({})", backend);
        Ok(())
    }

    /// The TTL applied to new entries
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    fn fail(operation: Operation, source: LogError) -> KeybaseError {
        tracing::warn!("keybase.{} failed: {}", operation, source);
        KeybaseError::new(operation, source)
    }

    async fn write(
        &self,
        ctx: &OpContext,
        operation: Operation,
        statement: Statement,
    ) -> Result<u64, KeybaseError> {
        let mut log = ctx
            .run(async { Ok::<_, LogError>(self.inner.log.write().await) })
            .await
            .map_err(|source| Self::fail(operation, source))?;

        // The log observes `ctx` up to its commit point
        log.execute(ctx, &statement)
            .await
            .map_err(|source| Self::fail(operation, source))
    }

    async fn read_values(
        &self,
        ctx: &OpContext,
        operation: Operation,
        select: Select,
    ) -> Result<Vec<String>, KeybaseError> {
        ctx.run(async {
            let log = self.inner.log.read().await;
            let rows = log.query_rows(&select).await?;
            single_text_column(rows)
        })
        .await
        .map_err(|source| Self::fail(operation, source))
    }

    async fn read_count(
        &self,
        ctx: &OpContext,
        operation: Operation,
        select: Select,
    ) -> Result<u64, KeybaseError> {
        ctx.run(async {
            let log = self.inner.log.read().await;
            log.query_scalar(&select).await?.into_count()
        })
        .await
        .map_err(|source| Self::fail(operation, source))
    }

    /// Records one occurrence of `key` in `namespace`, expiring after the TTL
    pub async fn put(
        &self,
        ctx: &OpContext,
        namespace: &str,
        key: &str,
    ) -> Result<(), KeybaseError> {
        let now = Timestamp::now();
        tracing::debug!(
            "PUT {}/{}",
            truncate_for_log(namespace),
            truncate_for_log(key)
        );

        let entry = Entry::with_ttl(namespace, key, now, self.inner.ttl);
        self.write(ctx, Operation::Put, query::put(entry)).await?;
        Ok(())
    }

    /// Lists keys in `namespace` matching a glob `pattern`, in storage order
    ///
    /// `*` matches any run of characters and `?` exactly one. ASCII letters
    /// match regardless of case; see [`Pattern`] for escaping.
    pub async fn match_key(
        &self,
        ctx: &OpContext,
        namespace: &str,
        pattern: &str,
        active: bool,
        unique: bool,
    ) -> Result<Vec<String>, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!(
            "MATCH {} {} (active: {}, unique: {})",
            truncate_for_log(namespace),
            truncate_for_log(pattern),
            active,
            unique
        );

        let pattern = Pattern::glob(pattern);
        let select = query::match_key(namespace, &pattern, active, unique, at);
        self.read_values(ctx, Operation::MatchKey, select).await
    }

    /// Counts occurrences of `key` in `namespace`
    pub async fn count_key(
        &self,
        ctx: &OpContext,
        namespace: &str,
        key: &str,
        active: bool,
    ) -> Result<u64, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!(
            "COUNT {}/{} (active: {})",
            truncate_for_log(namespace),
            truncate_for_log(key),
            active
        );

        let select = query::count_key(namespace, key, active, at);
        self.read_count(ctx, Operation::CountKey, select).await
    }

    /// Lists the keys recorded in `namespace`
    pub async fn get_keys(
        &self,
        ctx: &OpContext,
        namespace: &str,
        active: bool,
        unique: bool,
    ) -> Result<Vec<String>, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!(
            "KEYS {} (active: {}, unique: {})",
            truncate_for_log(namespace),
            active,
            unique
        );

        let select = query::get_keys(namespace, active, unique, at);
        self.read_values(ctx, Operation::GetKeys, select).await
    }

    /// Counts the keys recorded in `namespace`; `unique` counts each key once
    pub async fn count_keys(
        &self,
        ctx: &OpContext,
        namespace: &str,
        active: bool,
        unique: bool,
    ) -> Result<u64, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!(
            "COUNT KEYS {} (active: {}, unique: {})",
            truncate_for_log(namespace),
            active,
            unique
        );

        let select = query::count_keys(namespace, active, unique, at);
        self.read_count(ctx, Operation::CountKeys, select).await
    }

    /// Lists the distinct namespaces holding entries
    pub async fn get_namespaces(
        &self,
        ctx: &OpContext,
        active: bool,
    ) -> Result<Vec<String>, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!("NAMESPACES (active: {})", active);

        let select = query::get_namespaces(active, at);
        self.read_values(ctx, Operation::GetNamespaces, select).await
    }

    /// Counts the distinct namespaces holding entries
    pub async fn count_namespaces(
        &self,
        ctx: &OpContext,
        active: bool,
    ) -> Result<u64, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!("COUNT NAMESPACES (active: {})", active);

        let select = query::count_namespaces(active, at);
        self.read_count(ctx, Operation::CountNamespaces, select).await
    }

    /// Counts entries across all namespaces
    ///
    /// With `unique`, repeated (namespace, key) pairs count once; the same key
    /// in two namespaces still counts twice.
    pub async fn count_entries(
        &self,
        ctx: &OpContext,
        active: bool,
        unique: bool,
    ) -> Result<u64, KeybaseError> {
        let at = Timestamp::now();
        tracing::debug!("COUNT ENTRIES (active: {}, unique: {})", active, unique);

        let select = query::count_entries(active, unique, at);
        self.read_count(ctx, Operation::CountEntries, select).await
    }

    /// Removes every entry that is stale at call time
    ///
    /// Returns the number of entries removed.
    pub async fn prune_entries(&self, ctx: &OpContext) -> Result<u64, KeybaseError> {
        let at = Timestamp::now();

        let removed = self
            .write(ctx, Operation::PruneEntries, query::prune_entries(at))
            .await?;
        tracing::debug!("PRUNE removed {} entries", removed);
        Ok(removed)
    }

    /// Removes every entry regardless of expiration
    ///
    /// Returns the number of entries removed.
    pub async fn clear_entries(&self, ctx: &OpContext) -> Result<u64, KeybaseError> {
        let removed = self
            .write(ctx, Operation::ClearEntries, query::clear_entries())
            .await?;
        tracing::debug!("CLEAR removed {} entries", removed);
        Ok(removed)
    }
}

impl Default for Keybase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Keybase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keybase").field("ttl", &self.inner.ttl).finish_non_exhaustive()
    }
}
