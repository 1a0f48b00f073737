//! Configuration loading and validation.
//!
//! The route table is read once at startup and never reloaded. This
//! module resolves which file to read, and the [`sources`] submodule
//! parses, validates and fingerprints it. [`ConfigVersion`] identifies
//! the loaded content for the health endpoint.

pub mod model;
pub mod sources;
pub mod validation;

use std::path::{Path, PathBuf};

use crate::error::WaypointError;
use sources::file_source::FileSource;

/// File names probed in the working directory when `--config` is absent.
pub const CANDIDATE_FILES: &[&str] = &[
    "waypoint.yaml",
    "waypoint.yml",
    "waypoint.json",
    "waypoint.toml",
];

#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigVersion {
    Hash(String),
}

impl ConfigVersion {
    /// First eight hex digits, enough to tell deployments apart.
    #[must_use]
    pub fn short(&self) -> &str {
        match self {
            Self::Hash(h) => h.get(..8).unwrap_or(h),
        }
    }
}

/// Pick the config file: the explicit path if given, else the first
/// candidate present in the working directory.
pub async fn resolve_file_source(explicit: Option<&Path>) -> Result<FileSource, WaypointError> {
    if let Some(path) = explicit {
        return Ok(FileSource::new(path.to_path_buf()));
    }

    for name in CANDIDATE_FILES {
        let path = PathBuf::from(name);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "auto-detected config file");
            return Ok(FileSource::new(path));
        }
    }

    Err(WaypointError::NoConfigSource {
        hint: "Provide --config <file> or create ./waypoint.yaml.".into(),
    })
}
