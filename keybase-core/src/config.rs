use std::path::PathBuf;
use std::time::Duration;

/// Default time-to-live applied to every entry
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Location identifier that selects the in-memory log
pub const MEMORY_LOCATION: &str = ":memory:";

/// Environment variable holding the storage location
pub const STORAGE_ENV: &str = "KEYBASE_STORAGE";

/// Environment variable holding the TTL in milliseconds
pub const TTL_ENV: &str = "KEYBASE_TTL_MS";

/// Where the entry log lives
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Storage {
    /// Ephemeral log dropped with the store
    #[default]
    Memory,
    /// SQLite database file, created when absent
    File(PathBuf),
}

impl Storage {
    /// Maps a location identifier to a storage kind
    ///
    /// An empty string or `":memory:"` selects the in-memory log; anything
    /// else is treated as a database file path.
    pub fn from_location(location: &str) -> Self {
        let location = location.trim();
        if location.is_empty() || location == MEMORY_LOCATION {
            Storage::Memory
        } else {
            Storage::File(PathBuf::from(location))
        }
    }
}

/// Configuration for opening a keybase
///
/// # Example
///
/// ```rust
/// use keybase_core::KeybaseConfig;
/// use std::time::Duration;
///
/// let config = KeybaseConfig::default()
///     .with_storage("/tmp/keybase.db")
///     .with_ttl(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeybaseConfig {
    /// Backing storage for the entry log (default: in-memory)
    pub storage: Storage,
    /// Duration added to "now" to compute each entry's expiration (default: 10 seconds)
    pub ttl: Duration,
}

impl Default for KeybaseConfig {
    fn default() -> Self {
        Self {
            storage: Storage::Memory,
            ttl: DEFAULT_TTL,
        }
    }
}

impl KeybaseConfig {
    /// Creates a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the storage location
    ///
    /// # Arguments
    ///
    /// * `location` - A database file path, or `":memory:"` for an ephemeral log
    pub fn with_storage(mut self, location: impl AsRef<str>) -> Self {
        self.storage = Storage::from_location(location.as_ref());
        self
    }

    /// Sets the TTL applied to entries created by this store
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Creates configuration from environment variables.
    ///
    /// Reads:
    /// - `KEYBASE_STORAGE` - Storage location (defaults to in-memory)
    /// - `KEYBASE_TTL_MS` - Entry TTL in milliseconds (defaults to 10000);
    ///   unparsable values fall back to the default
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let storage = lookup(STORAGE_ENV)
            .map(|location| Storage::from_location(&location))
            .unwrap_or_default();
        let ttl = lookup(TTL_ENV)
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TTL);

        Self { storage, ttl }
    }
}
