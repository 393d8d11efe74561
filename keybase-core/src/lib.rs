//! # Keybase Core
//!
//! A namespaced key-counting cache whose entries expire after a fixed TTL.
//!
//! ## Features
//!
//! - Every put appends one entry; counts and listings see each occurrence
//! - Reads filter to active entries on request, stale ones stay until pruned
//! - Glob matching over keys (`*`, `?`, `\` escapes)
//! - In-memory or SQLite-file storage behind the same [`EntryLog`] seam
//! - Per-call cancellation and deadlines through [`OpContext`]
//!
//! ## Example
//!
//! ```rust,no_run
//! use keybase_core::{Keybase, KeybaseConfig, OpContext};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), keybase_core::KeybaseError> {
//!     // In-memory keybase with a 10 second TTL
//!     let keybase = Keybase::new();
//!
//!     // Or durable, from KEYBASE_STORAGE / KEYBASE_TTL_MS
//!     let keybase = Keybase::open(KeybaseConfig::from_env()).await?;
//!
//!     let ctx = OpContext::with_timeout(Duration::from_secs(1));
//!     keybase.put(&ctx, "requests", "10.0.0.1").await?;
//!     keybase.put(&ctx, "requests", "10.0.0.2").await?;
//!
//!     let hosts = keybase.match_key(&ctx, "requests", "10.0.0.*", true, true).await?;
//!     println!("{} active hosts", hosts.len());
//!
//!     // Stale entries are removed only when asked
//!     let removed = keybase.prune_entries(&ctx).await?;
//!     println!("pruned {}", removed);
//!
//!     keybase.close().await
//! }
//! ```

mod config;
mod context;
mod entry;
mod error;
pub mod log;
pub mod query;
mod store;

pub use config::{KeybaseConfig, Storage, DEFAULT_TTL};
pub use context::{CancelHandle, OpContext};
pub use entry::{Entry, Timestamp};
pub use error::{CountResultExt, ErrorKind, KeybaseError, LogError, Operation, INVALID_COUNT};
pub use log::{EntryLog, MemoryLog, SqliteLog};
pub use query::Pattern;
pub use store::Keybase;
