//! Async file-based config source with SHA-256 fingerprinting.
//!
//! [`FileSource`] reads the file through Tokio, picks the parser from
//! the file extension, validates the result and hashes the raw content
//! so the running instance can report which config it was started with.

use std::path::{Path, PathBuf};

use super::{parse_config_str, sha256_hex};
use crate::config::model::Config;
use crate::config::validation::validate;
use crate::config::ConfigVersion;
use crate::error::WaypointError;

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source label for logs and the health endpoint (`"yaml"`, `"json"`...).
    #[must_use]
    pub fn name(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("file")
    }

    async fn read_content(&self) -> Result<String, WaypointError> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                WaypointError::ConfigFileNotFound {
                    path: self.path.clone(),
                }
            } else {
                WaypointError::Io(e)
            }
        })
    }

    pub async fn load(&self) -> Result<(Config, ConfigVersion), WaypointError> {
        let content = self.read_content().await?;
        let ext = self.path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config = parse_config_str(ext, &content, &self.path.display().to_string())?;

        if let Err(errors) = validate(&config) {
            return Err(WaypointError::ConfigValidation { errors });
        }

        let hash = sha256_hex(content.as_bytes());
        Ok((config, ConfigVersion::Hash(hash)))
    }
}
