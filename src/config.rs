//! Engine configuration, persisted as TOML.
//!
//! Every section defaults independently, so a config file only needs the
//! fields it changes:
//!
//! ```toml
//! checkpoint_dir = "/srv/remedy/checkpoints"
//!
//! [model]
//! embed_dim = 64
//!
//! [trainer]
//! epochs = 40
//!
//! [rank]
//! symbolic_bonus = 0.1
//!
//! [neo4j]
//! uri = "http://localhost:7474"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::graph::Neo4jConfig;
use crate::model::ModelConfig;
use crate::model::checkpoint::BEST_CHECKPOINT;
use crate::paths::RemedyPaths;
use crate::rank::RankConfig;
use crate::train::TrainerConfig;

pub type ConfigResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where checkpoints are read and written. `None` resolves to
    /// `$XDG_DATA_HOME/remedy/checkpoints`.
    pub checkpoint_dir: Option<PathBuf>,
    /// Checkpoint file served for inference, relative to `checkpoint_dir`.
    pub checkpoint_file: Option<String>,
    /// Local graph document, used when no Neo4j server is configured.
    pub graph_file: Option<PathBuf>,
    /// Architecture for new training runs. Node and relation counts are
    /// taken from the graph.
    pub model: ModelConfig,
    pub trainer: TrainerConfig,
    pub rank: RankConfig,
    pub neo4j: Option<Neo4jConfig>,
}

impl EngineConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EngineError::ConfigRead {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| EngineError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EngineError::ConfigWrite {
                path: parent.display().to_string(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| EngineError::ConfigWrite {
            path: path.display().to_string(),
            source,
        })
    }

    /// Reject architectures and hyper-parameters that cannot be trained or served.
    pub fn validate(&self) -> ConfigResult<()> {
        let model = ModelConfig {
            num_nodes: 1,
            ..self.model.clone()
        };
        model.validate().map_err(|e| EngineError::InvalidConfig {
            message: e.to_string(),
        })?;
        self.trainer
            .validate()
            .map_err(|e| EngineError::InvalidConfig {
                message: e.to_string(),
            })?;
        if !(0.0..=1.0).contains(&self.rank.symbolic_bonus) {
            return Err(EngineError::InvalidConfig {
                message: format!(
                    "symbolic_bonus {} must be in [0, 1]",
                    self.rank.symbolic_bonus
                ),
            });
        }
        Ok(())
    }

    pub fn resolve_checkpoint_dir(&self) -> ConfigResult<PathBuf> {
        match &self.checkpoint_dir {
            Some(dir) => Ok(dir.clone()),
            None => RemedyPaths::resolve()
                .map(|p| p.checkpoint_dir())
                .map_err(|e| EngineError::DataDir {
                    path: e.to_string(),
                }),
        }
    }

    /// The checkpoint the model manager loads.
    pub fn resolve_checkpoint_path(&self) -> ConfigResult<PathBuf> {
        let file = self.checkpoint_file.as_deref().unwrap_or(BEST_CHECKPOINT);
        Ok(self.resolve_checkpoint_dir()?.join(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.model.embed_dim, 128);
        assert_eq!(c.model.hidden_dim, 256);
        assert_eq!(c.trainer.learning_rate, 1e-3);
        assert_eq!(c.rank.candidate_pool, 50);
        assert!((c.rank.symbolic_bonus - 0.2).abs() < 1e-6);
        c.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let c: EngineConfig = toml::from_str(
            r#"
            checkpoint_dir = "/tmp/ckpt"

            [model]
            embed_dim = 32

            [trainer]
            epochs = 7

            [neo4j]
            uri = "http://localhost:7474"
            "#,
        )
        .unwrap();
        assert_eq!(c.model.embed_dim, 32);
        assert_eq!(c.model.num_heads, 4);
        assert_eq!(c.trainer.epochs, 7);
        assert_eq!(c.trainer.batch_size, 256);
        assert_eq!(c.neo4j.as_ref().unwrap().database, "neo4j");
        assert_eq!(
            c.resolve_checkpoint_path().unwrap(),
            Path::new("/tmp/ckpt/best_model.ckpt")
        );
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested/config.toml");
        let config = EngineConfig {
            checkpoint_dir: Some(dir.path().join("ckpt")),
            rank: RankConfig {
                candidate_pool: 10,
                symbolic_bonus: 0.1,
            },
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn bad_architecture_fails_fast() {
        let config = EngineConfig {
            model: ModelConfig {
                hidden_dim: 10,
                num_heads: 4,
                ..ModelConfig::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn unreadable_file_is_reported() {
        let err = EngineConfig::load(Path::new("/nonexistent/remedy.toml")).unwrap_err();
        assert!(matches!(err, EngineError::ConfigRead { .. }));
    }

    #[test]
    fn unwritable_path_keeps_the_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = EngineConfig::default()
            .save(&blocker.join("config.toml"))
            .unwrap_err();
        assert!(matches!(err, EngineError::ConfigWrite { .. }));
        assert!(std::error::Error::source(&err).is_some());
    }
}
