//! Blackboard API
//!
//! Entry point of the library: opens the backing store and attaches
//! blackboards by name.
//!
//! ## Usage
//!
//! ```ignore
//! let api = BlackboardApi::open(Access::Standard)?;
//! let feeds = api.load_blackboard("FEED")?;
//!
//! let filter = Filter::builder().tags(["FOR>Tag_11"]).limit(10).build()?;
//! for doc in feeds.find(&filter)? {
//!     println!("{:?}", doc?);
//! }
//! ```

use anyhow::Context;
use tracing::debug;

use crate::blackboard::Blackboard;
use crate::config::Config;
use crate::counter::{read_blackboard_type, BlackboardType, COUNTER_SUFFIX};
use crate::error::{BlackboardError, Result};
use crate::storage::{SqliteStore, DEFAULT_BATCH_SIZE};

/// Characters a blackboard name may not contain
const FORBIDDEN_NAME_CHARS: [char; 3] = [' ', '$', '_'];

/// Privilege level of a session
///
/// Deleting documents and tags requires [`Access::Admin`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Access {
    #[default]
    Standard,
    Admin,
}

impl Access {
    pub fn is_admin(self) -> bool {
        self == Access::Admin
    }
}

/// Attaches blackboards stored in one backing store
pub struct BlackboardApi {
    store: SqliteStore,
    access: Access,
    batch_size: usize,
}

impl BlackboardApi {
    /// Open the store from the default configuration
    pub fn open(access: Access) -> anyhow::Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(&config, access)
    }

    /// Open the store described by `config`
    pub fn open_with_config(config: &Config, access: Access) -> anyhow::Result<Self> {
        let path = config.database_path();
        let store = SqliteStore::open(&path)
            .with_context(|| format!("Failed to open database: {:?}", path))?;
        Ok(Self::with_store(store, access).with_batch_size(config.batch_size))
    }

    /// Use an already opened store
    pub fn with_store(store: SqliteStore, access: Access) -> Self {
        Self {
            store,
            access,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Page size of result streams
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Names of all blackboards, sorted
    pub fn blackboard_names(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .collection_names()?
            .into_iter()
            .filter_map(|name| name.strip_suffix(COUNTER_SUFFIX).map(str::to_string))
            .filter(|name| !name.is_empty())
            .collect())
    }

    pub fn blackboard_exists(&self, name: &str) -> Result<bool> {
        validate_blackboard_name(name)?;
        Ok(read_blackboard_type(&self.store, name)?.is_some())
    }

    pub fn blackboard_type(&self, name: &str) -> Result<BlackboardType> {
        validate_blackboard_name(name)?;
        read_blackboard_type(&self.store, name)?
            .ok_or_else(|| BlackboardError::BlackboardNotFound(name.to_string()))
    }

    /// Attach a blackboard with the storage strategy of its recorded type
    pub fn load_blackboard(&self, name: &str) -> Result<Blackboard> {
        validate_blackboard_name(name)?;
        debug!(blackboard = name, "Loading blackboard");
        Blackboard::attach(self.store.clone(), name, self.access, self.batch_size)
    }

    /// Attach a blackboard that must be of the `expected` type
    pub fn load_blackboard_as(&self, name: &str, expected: BlackboardType) -> Result<Blackboard> {
        let actual = self.blackboard_type(name)?;
        if actual != expected {
            return Err(BlackboardError::invalid(format!(
                "Blackboard '{}' is {}, not {}",
                name, actual, expected
            )));
        }
        self.load_blackboard(name)
    }
}

/// Reject names that are empty or contain a space, `$` or `_`
pub fn validate_blackboard_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(&FORBIDDEN_NAME_CHARS[..]) {
        return Err(BlackboardError::invalid(format!(
            "Forbidden characters in blackboard name ('$', '_', ' '): '{}'",
            name
        )));
    }
    Ok(())
}
