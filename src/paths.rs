//! XDG-compliant path resolution for remedy.
//!
//! Trained checkpoints live under `$XDG_DATA_HOME/remedy/checkpoints/` and the
//! global config file under `$XDG_CONFIG_HOME/remedy/config.toml`.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::model::checkpoint::{BEST_CHECKPOINT, FINAL_CHECKPOINT, HISTORY_FILE};

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(remedy::paths::no_home),
        help("Set the HOME environment variable, or pass explicit paths with --config / --checkpoint-dir.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(remedy::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global directories for remedy.
#[derive(Debug, Clone)]
pub struct RemedyPaths {
    /// `$XDG_CONFIG_HOME/remedy/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/remedy/`
    pub data_dir: PathBuf,
}

impl RemedyPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;

        let config_dir = std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".config"))
            .join("remedy");

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".local/share"))
            .join("remedy");

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Rooted at an explicit data directory; config sits beside it.
    pub fn under(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            data_dir: root.to_path_buf(),
        }
    }

    /// `data_dir/checkpoints/`
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    /// Checkpoint served by default.
    pub fn best_checkpoint(&self) -> PathBuf {
        self.checkpoint_dir().join(BEST_CHECKPOINT)
    }

    pub fn final_checkpoint(&self) -> PathBuf {
        self.checkpoint_dir().join(FINAL_CHECKPOINT)
    }

    pub fn history_file(&self) -> PathBuf {
        self.checkpoint_dir().join(HISTORY_FILE)
    }

    /// Path to the global config file.
    pub fn global_config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.checkpoint_dir()] {
            std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }
}
