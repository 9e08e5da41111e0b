//! Checkpoint bundles.
//!
//! One checkpoint file holds everything needed to serve or resume a model:
//! the identifier mapping (with node kinds), the architecture config, the
//! learned weights, optimizer and scheduler state, training history and a
//! timestamp. Files are bincode-encoded and written through a temporary file
//! and a rename, so a reader never observes a partial checkpoint.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CheckpointError, ModelError};
use crate::train::metrics::TrainingHistory;
use crate::train::optim::AdamWState;
use crate::train::schedule::CosineWarmRestarts;

use super::{DrugRepurposingModel, IdMapping, ModelConfig, ModelResult};

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = std::result::Result<T, CheckpointError>;

/// Bumped whenever the bundle layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Best-by-validation-AUC checkpoint.
pub const BEST_CHECKPOINT: &str = "best_model.ckpt";
/// End-of-run checkpoint.
pub const FINAL_CHECKPOINT: &str = "final_model.ckpt";
/// Per-run history, as JSON.
pub const HISTORY_FILE: &str = "training_history.json";

/// File name of the periodic checkpoint after `epoch` (1-based).
pub fn periodic_checkpoint_name(epoch: usize) -> String {
    format!("checkpoint_epoch_{epoch}.ckpt")
}

// ---------------------------------------------------------------------------
// Tensor records
// ---------------------------------------------------------------------------

/// A dense f32 tensor as shape plus row-major data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl TensorRecord {
    pub fn from_tensor(tensor: &Tensor) -> ModelResult<Self> {
        let shape = tensor.dims().to_vec();
        let data = tensor
            .to_dtype(DType::F32)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        Ok(Self { shape, data })
    }

    pub fn to_tensor(&self, device: &Device) -> ModelResult<Tensor> {
        let expected: usize = self.shape.iter().product();
        if expected != self.data.len() {
            return Err(ModelError::Tensor {
                message: format!(
                    "record of shape {:?} carries {} values",
                    self.shape,
                    self.data.len()
                ),
            });
        }
        Ok(Tensor::from_slice(&self.data, self.shape.as_slice(), device)?)
    }
}

/// Snapshot every variable of `varmap` by name.
pub fn snapshot_weights(varmap: &VarMap) -> ModelResult<BTreeMap<String, TensorRecord>> {
    let vars = varmap.data().lock().expect("varmap lock poisoned");
    vars.iter()
        .map(|(name, var)| Ok((name.clone(), TensorRecord::from_tensor(var.as_tensor())?)))
        .collect()
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub config: ModelConfig,
    pub mapping: IdMapping,
    pub weights: BTreeMap<String, TensorRecord>,
    pub optimizer: Option<AdamWState>,
    pub scheduler: Option<CosineWarmRestarts>,
    pub history: TrainingHistory,
    /// Epochs completed when this checkpoint was taken.
    pub epoch: usize,
    pub best_auc: f32,
    pub timestamp: DateTime<Utc>,
}

impl Checkpoint {
    /// Bundle weights and metadata; optimizer/scheduler state is attached separately.
    pub fn new(
        config: ModelConfig,
        mapping: IdMapping,
        weights: BTreeMap<String, TensorRecord>,
        history: TrainingHistory,
    ) -> Self {
        let best_auc = history.best_auc().unwrap_or(0.0);
        Self {
            format_version: FORMAT_VERSION,
            config,
            mapping,
            weights,
            optimizer: None,
            scheduler: None,
            epoch: history.epochs(),
            best_auc,
            history,
            timestamp: Utc::now(),
        }
    }

    pub fn with_training_state(mut self, optimizer: AdamWState, scheduler: CosineWarmRestarts) -> Self {
        self.optimizer = Some(optimizer);
        self.scheduler = Some(scheduler);
        self
    }

    /// Encode to `path`, replacing any previous file atomically.
    pub fn save(&self, path: &Path) -> CheckpointResult<()> {
        let io_err = |source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let bytes = bincode::serialize(self).map_err(|e| CheckpointError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let tmp = temp_path(path);
        std::fs::write(&tmp, &bytes).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        tracing::info!(
            path = %path.display(),
            epoch = self.epoch,
            nodes = self.mapping.len(),
            bytes = bytes.len(),
            "checkpoint saved"
        );
        Ok(())
    }

    /// Decode from `path`, checking the bundle is internally consistent.
    pub fn load(path: &Path) -> CheckpointResult<Self> {
        if !path.exists() {
            return Err(CheckpointError::NotFound {
                path: path.display().to_string(),
            });
        }
        let bytes = std::fs::read(path).map_err(|source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let corrupt = |message: String| CheckpointError::Corrupt {
            path: path.display().to_string(),
            message,
        };
        let checkpoint: Self = bincode::deserialize(&bytes).map_err(|e| corrupt(e.to_string()))?;
        if checkpoint.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "format version {} (expected {FORMAT_VERSION})",
                checkpoint.format_version
            )));
        }
        if checkpoint.mapping.len() != checkpoint.config.num_nodes {
            return Err(corrupt(format!(
                "mapping has {} nodes but config declares {}",
                checkpoint.mapping.len(),
                checkpoint.config.num_nodes
            )));
        }
        Ok(checkpoint)
    }

    /// Weights as tensors on `device`.
    pub fn tensors(&self, device: &Device) -> CheckpointResult<HashMap<String, Tensor>> {
        self.weights
            .iter()
            .map(|(name, record)| Ok((name.clone(), record.to_tensor(device)?)))
            .collect()
    }

    /// Inference-only model over the stored weights.
    pub fn build_model(&self, device: &Device) -> CheckpointResult<DrugRepurposingModel> {
        let weights = self.tensors(device)?;
        Ok(DrugRepurposingModel::from_weights(
            self.config.clone(),
            weights,
            device,
        )?)
    }

    /// Overwrite the variables of a trainable model with the stored weights.
    pub fn restore_into(&self, varmap: &VarMap) -> CheckpointResult<()> {
        let vars = varmap.data().lock().expect("varmap lock poisoned");
        for (name, var) in vars.iter() {
            let record = self
                .weights
                .get(name)
                .ok_or_else(|| CheckpointError::MissingTensor { name: name.clone() })?;
            let tensor = record.to_tensor(var.device())?;
            var.set(&tensor).map_err(ModelError::from)?;
        }
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
