use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the sled database.
    pub path: PathBuf,
    /// Use a throwaway database that is removed on drop.
    pub temporary: bool,
    /// sled page cache size in bytes.
    pub cache_capacity: u64,
    /// Flush to disk after every commit instead of relying on sled's background flusher.
    pub flush_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./forum.db"),
            temporary: false,
            cache_capacity: 64 * 1024 * 1024,
            flush_on_commit: false,
        }
    }
}

impl StoreConfig {
    pub fn temporary() -> Self {
        Self { temporary: true, ..Self::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForumConfig {
    pub store: StoreConfig,
    /// Post content is truncated to this many bytes.
    pub max_post_size: usize,
    /// Page size for post listings.
    pub page_limit: usize,
}

impl Default for ForumConfig {
    fn default() -> Self {
        Self { store: StoreConfig::default(), max_post_size: 2 * 1024, page_limit: 20 }
    }
}

impl ForumConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut f = File::open(path.as_ref()).map_err(|e| IndexError::Config(e.to_string()))?;
        let mut buf = String::new();
        f.read_to_string(&mut buf).map_err(|e| IndexError::Config(e.to_string()))?;
        serde_json::from_str(&buf).map_err(|e| IndexError::Config(e.to_string()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).map_err(|e| IndexError::Config(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| IndexError::Config(e.to_string()))?;
        let mut f = File::create(path).map_err(|e| IndexError::Config(e.to_string()))?;
        f.write_all(json.as_bytes()).map_err(|e| IndexError::Config(e.to_string()))?;
        Ok(())
    }
}
