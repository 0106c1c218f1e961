//! 最后状态文件 - 本地持久化上一次的值

use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::error::{MonitorError, Result};

/// Single text file holding the last reported raw value
#[derive(Debug, Clone)]
pub struct LastValueFile {
    path: PathBuf,
}

impl LastValueFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Stored value, or `None` if missing, empty or unreadable
    pub fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let value = content.trim();
                if value.is_empty() {
                    debug!(path = %self.path.display(), "State file empty");
                    None
                } else {
                    Some(value.to_string())
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No state file, starting fresh");
                None
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read state file, starting fresh"
                );
                None
            }
        }
    }

    /// Overwrite the stored value
    pub fn store(&self, value: &str) -> Result<()> {
        self.write(value).map_err(|e| {
            MonitorError::Persistence(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write(&self, value: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)?;

        file.lock_exclusive()?;
        file.set_len(0)?;
        file.write_all(value.as_bytes())?;
        file.sync_data()?;
        file.unlock()?;
        Ok(())
    }

    /// Store and log on failure; callers carry on either way
    pub fn store_or_warn(&self, value: &str) {
        if let Err(e) = self.store(value) {
            warn!(error = %e, "Failed to persist last known value");
        }
    }
}
