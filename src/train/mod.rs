//! Training pipeline for the encoder and pair scorer.
//!
//! Stages run strictly in order:
//!
//! 1. [`Trainer::load_graph`]: nodes and edges from the graph source, building
//!    the identifier mapping and edge tensors
//! 2. [`Trainer::load_pairs`]: treatment positives, sampled negatives, and a
//!    stratified train/validation split
//! 3. [`Trainer::initialize_model`]: fresh weights, AdamW and the LR schedule
//! 4. [`Trainer::run`]: epochs with evaluation, early stopping and checkpoints
//!
//! [`Trainer::resume_from`] replaces stages 1 and 3 with the state stored in
//! a checkpoint.

pub mod metrics;
pub mod optim;
pub mod sampling;
pub mod schedule;
pub mod supervisor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::graph::{GraphSource, Relation, fetch_edges, fetch_nodes, fetch_treatment_pairs};
use crate::model::checkpoint::{
    BEST_CHECKPOINT, FINAL_CHECKPOINT, HISTORY_FILE, periodic_checkpoint_name, snapshot_weights,
};
use crate::model::{Checkpoint, DrugRepurposingModel, GraphTensors, IdMapping, ModelConfig};

pub use metrics::{EvalMetrics, TrainingHistory};
pub use optim::{AdamW, AdamWParams};
pub use sampling::TrainingPair;
pub use schedule::CosineWarmRestarts;
pub use supervisor::{TrainingStatus, TrainingSupervisor};

/// Result type for training operations.
pub type TrainResult<T> = std::result::Result<T, TrainError>;

/// Probabilities are clamped away from 0 and 1 inside the loss.
const LOSS_EPS: f32 = 1e-7;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Training hyper-parameters. The architecture lives in [`ModelConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub learning_rate: f64,
    pub weight_decay: f64,
    pub batch_size: usize,
    pub epochs: usize,
    /// Epochs without a validation AUC improvement before stopping.
    pub patience: usize,
    pub val_fraction: f64,
    pub seed: u64,
    /// Save `checkpoint_epoch_<n>.ckpt` every this many epochs; 0 disables.
    pub checkpoint_every: usize,
    /// Ceiling on the global gradient L2 norm.
    pub grad_clip: f64,
    pub scheduler_t0: usize,
    pub scheduler_t_mult: usize,
    /// Labels are smoothed to `[s, 1 - s]`.
    pub label_smoothing: f32,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            weight_decay: 0.01,
            batch_size: 256,
            epochs: 100,
            patience: 15,
            val_fraction: 0.2,
            seed: 42,
            checkpoint_every: 10,
            grad_clip: 1.0,
            scheduler_t0: 10,
            scheduler_t_mult: 2,
            label_smoothing: 0.05,
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> TrainResult<()> {
        let invalid = |message: String| Err(TrainError::InvalidConfig { message });
        if self.batch_size == 0 {
            return invalid("batch_size must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.val_fraction) {
            return invalid(format!("val_fraction {} must be in [0, 1)", self.val_fraction));
        }
        if !(0.0..0.5).contains(&self.label_smoothing) {
            return invalid(format!(
                "label_smoothing {} must be in [0, 0.5)",
                self.label_smoothing
            ));
        }
        if self.learning_rate <= 0.0 || self.grad_clip <= 0.0 {
            return invalid("learning_rate and grad_clip must be positive".into());
        }
        Ok(())
    }

    fn smooth(&self, label: f32) -> f32 {
        label * (1.0 - 2.0 * self.label_smoothing) + self.label_smoothing
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What one finished epoch looked like.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    pub total_epochs: usize,
    pub train_loss: f32,
    pub val: EvalMetrics,
    pub learning_rate: f64,
    pub best_auc: f32,
    pub improved: bool,
}

/// Outcome of [`Trainer::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs_completed: usize,
    pub best_auc: f32,
    pub stopped_early: bool,
    pub best_checkpoint: PathBuf,
    pub final_checkpoint: PathBuf,
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

struct LoadedGraph {
    mapping: IdMapping,
    tensors: GraphTensors,
}

struct Split {
    train: Vec<TrainingPair>,
    val: Vec<TrainingPair>,
}

struct Session {
    model: DrugRepurposingModel,
    varmap: VarMap,
    optimizer: AdamW,
    scheduler: CosineWarmRestarts,
}

pub struct Trainer {
    config: TrainerConfig,
    model_config: ModelConfig,
    source: Arc<dyn GraphSource>,
    save_dir: PathBuf,
    device: Device,
    rng: StdRng,
    graph: Option<LoadedGraph>,
    split: Option<Split>,
    session: Option<Session>,
    history: TrainingHistory,
    best_auc: f32,
    epochs_without_improvement: usize,
}

impl Trainer {
    /// `model_config` gives the architecture; its node and relation counts are
    /// replaced by those of the loaded graph.
    pub fn new(
        config: TrainerConfig,
        model_config: ModelConfig,
        source: Arc<dyn GraphSource>,
        save_dir: impl Into<PathBuf>,
    ) -> TrainResult<Self> {
        config.validate()?;
        let rng = StdRng::seed_from_u64(config.seed);
        Ok(Self {
            config,
            model_config,
            source,
            save_dir: save_dir.into(),
            device: Device::Cpu,
            rng,
            graph: None,
            split: None,
            session: None,
            history: TrainingHistory::default(),
            // The first evaluated epoch always counts as an improvement, so
            // a best checkpoint exists after any run.
            best_auc: f32::NEG_INFINITY,
            epochs_without_improvement: 0,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn best_auc(&self) -> f32 {
        self.best_auc
    }

    pub fn mapping(&self) -> Option<&IdMapping> {
        self.graph.as_ref().map(|g| &g.mapping)
    }

    /// `(train, validation)` pair counts once pairs are loaded.
    pub fn split_sizes(&self) -> Option<(usize, usize)> {
        self.split.as_ref().map(|s| (s.train.len(), s.val.len()))
    }

    // -- stages ------------------------------------------------------------

    /// Load nodes and edges and assign embedding indices.
    pub fn load_graph(&mut self) -> TrainResult<()> {
        if self.session.is_some() {
            return Err(TrainError::StageOrder {
                stage: "load_graph",
            });
        }
        let nodes = fetch_nodes(self.source.as_ref())?;
        let mapping = IdMapping::from_nodes(&nodes);
        self.install_graph(mapping)
    }

    fn install_graph(&mut self, mapping: IdMapping) -> TrainResult<()> {
        let edges = fetch_edges(self.source.as_ref())?;
        let tensors = GraphTensors::build(&mapping, &edges, Relation::COUNT, &self.device)?;
        tracing::info!(
            source = self.source.name(),
            nodes = tensors.num_nodes,
            edges = tensors.num_edges,
            skipped = tensors.skipped_edges,
            "graph loaded"
        );
        self.graph = Some(LoadedGraph { mapping, tensors });
        self.split = None;
        Ok(())
    }

    /// Build positives from treatment edges, sample negatives, split.
    pub fn load_pairs(&mut self) -> TrainResult<()> {
        let Some(graph) = &self.graph else {
            return Err(TrainError::StageOrder {
                stage: "load_pairs",
            });
        };
        let treatments = fetch_treatment_pairs(self.source.as_ref())?;
        let positives = sampling::positive_pairs(&graph.mapping, &treatments);
        if positives.is_empty() {
            return Err(TrainError::NoPositives);
        }
        let negatives = sampling::sample_negatives(&graph.mapping, &positives, &mut self.rng);
        tracing::info!(
            positives = positives.len(),
            negatives = negatives.len(),
            "training pairs sampled"
        );

        let mut pairs = positives;
        pairs.extend(negatives);
        let (train, val) = sampling::stratified_split(pairs, self.config.val_fraction, &mut self.rng);
        tracing::info!(train = train.len(), val = val.len(), "pairs split");
        self.split = Some(Split { train, val });
        Ok(())
    }

    /// Fresh weights, optimizer and schedule for the loaded graph.
    pub fn initialize_model(&mut self) -> TrainResult<()> {
        let (Some(graph), Some(_)) = (&self.graph, &self.split) else {
            return Err(TrainError::StageOrder {
                stage: "initialize_model",
            });
        };
        let model_config = ModelConfig {
            num_nodes: graph.mapping.len(),
            num_relations: Relation::COUNT,
            ..self.model_config.clone()
        };
        let (model, varmap) = DrugRepurposingModel::trainable(model_config.clone(), &self.device)?;

        let vars: Vec<_> = varmap
            .data()
            .lock()
            .expect("varmap lock poisoned")
            .iter()
            .map(|(name, var)| (name.clone(), var.clone()))
            .collect();
        let parameters: usize = vars.iter().map(|(_, v)| v.elem_count()).sum();
        let optimizer = AdamW::new(
            vars,
            AdamWParams {
                lr: self.config.learning_rate,
                weight_decay: self.config.weight_decay,
                ..AdamWParams::default()
            },
        )?;
        let scheduler = CosineWarmRestarts::new(
            self.config.learning_rate,
            self.config.scheduler_t0,
            self.config.scheduler_t_mult,
        );

        tracing::info!(
            parameters,
            embed_dim = model_config.embed_dim,
            hidden_dim = model_config.hidden_dim,
            layers = model_config.num_layers,
            "model initialized"
        );
        self.model_config = model_config;
        self.session = Some(Session {
            model,
            varmap,
            optimizer,
            scheduler,
        });
        Ok(())
    }

    /// Continue from a checkpoint: its mapping, weights, optimizer and
    /// schedule state, and history. Edges are re-read from the graph source.
    pub fn resume_from(&mut self, checkpoint: &Checkpoint) -> TrainResult<()> {
        self.model_config = checkpoint.config.clone();
        self.session = None;
        self.install_graph(checkpoint.mapping.clone())?;
        self.load_pairs()?;
        self.initialize_model()?;

        let Some(session) = self.session.as_mut() else {
            return Err(TrainError::StageOrder {
                stage: "resume_from",
            });
        };
        checkpoint.restore_into(&session.varmap)?;
        if let Some(state) = &checkpoint.optimizer {
            session.optimizer.load_state(state, &self.device)?;
        }
        if let Some(scheduler) = checkpoint.scheduler {
            session.scheduler = scheduler;
            session.optimizer.set_learning_rate(scheduler.current_lr());
        }
        self.history = checkpoint.history.clone();
        self.best_auc = checkpoint.best_auc;
        self.epochs_without_improvement = 0;
        tracing::info!(
            epoch = checkpoint.epoch,
            best_auc = checkpoint.best_auc,
            "resumed from checkpoint"
        );
        Ok(())
    }

    /// One pass over the shuffled training pairs. Returns the mean loss.
    pub fn train_epoch(&mut self) -> TrainResult<f32> {
        let (Some(graph), Some(split), Some(session)) =
            (&self.graph, &mut self.split, &mut self.session)
        else {
            return Err(TrainError::StageOrder {
                stage: "train_epoch",
            });
        };
        split.train.shuffle(&mut self.rng);
        if split.train.is_empty() {
            return Ok(0.0);
        }

        let num_batches = split.train.len().div_ceil(self.config.batch_size);
        let mut total_loss = 0.0f32;
        for batch in split.train.chunks(self.config.batch_size) {
            let compounds: Vec<u32> = batch.iter().map(|p| p.compound).collect();
            let diseases: Vec<u32> = batch.iter().map(|p| p.disease).collect();
            let targets: Vec<f32> = batch.iter().map(|p| self.config.smooth(p.label)).collect();
            let targets = Tensor::from_vec(targets, batch.len(), &self.device)?;

            let probs = session
                .model
                .forward(&graph.tensors, &compounds, &diseases, true)?;
            let loss = bce_loss(&probs, &targets)?;

            let mut grads = loss.backward()?;
            optim::clip_grad_norm(&mut grads, session.optimizer.vars(), self.config.grad_clip)?;
            session.optimizer.step(&grads)?;
            let lr = session.scheduler.advance(1.0 / num_batches as f64);
            session.optimizer.set_learning_rate(lr);

            total_loss += loss.to_scalar::<f32>()? * batch.len() as f32;
        }
        Ok(total_loss / split.train.len() as f32)
    }

    /// Score the validation split without dropout.
    pub fn evaluate(&self) -> TrainResult<EvalMetrics> {
        let Some(split) = &self.split else {
            return Err(TrainError::StageOrder { stage: "evaluate" });
        };
        self.evaluate_pairs(&split.val)
    }

    /// Score arbitrary pairs without dropout.
    pub fn evaluate_pairs(&self, pairs: &[TrainingPair]) -> TrainResult<EvalMetrics> {
        let (Some(graph), Some(session)) = (&self.graph, &self.session) else {
            return Err(TrainError::StageOrder { stage: "evaluate" });
        };
        let labels: Vec<f32> = pairs.iter().map(|p| p.label).collect();
        if pairs.is_empty() {
            return Ok(metrics::evaluate_scores(&labels, &[]));
        }
        let compounds: Vec<u32> = pairs.iter().map(|p| p.compound).collect();
        let diseases: Vec<u32> = pairs.iter().map(|p| p.disease).collect();
        let scores = session
            .model
            .forward(&graph.tensors, &compounds, &diseases, false)?
            .detach()
            .to_vec1::<f32>()?;
        Ok(metrics::evaluate_scores(&labels, &scores))
    }

    /// Bundle the current state.
    pub fn checkpoint(&self) -> TrainResult<Checkpoint> {
        let (Some(graph), Some(session)) = (&self.graph, &self.session) else {
            return Err(TrainError::StageOrder {
                stage: "checkpoint",
            });
        };
        let weights = snapshot_weights(&session.varmap)?;
        let mut checkpoint = Checkpoint::new(
            self.model_config.clone(),
            graph.mapping.clone(),
            weights,
            self.history.clone(),
        )
        .with_training_state(session.optimizer.state()?, session.scheduler);
        checkpoint.best_auc = self.best_auc;
        Ok(checkpoint)
    }

    fn save_checkpoint(&self, name: &str) -> TrainResult<PathBuf> {
        let path = self.save_dir.join(name);
        self.checkpoint()?.save(&path)?;
        Ok(path)
    }

    /// Run any stages not yet done, then train until the epoch limit or
    /// early stop. `on_epoch` sees every finished epoch.
    pub fn run(&mut self, mut on_epoch: impl FnMut(&EpochReport)) -> TrainResult<TrainingSummary> {
        if self.graph.is_none() {
            self.load_graph()?;
        }
        if self.split.is_none() {
            self.load_pairs()?;
        }
        if self.session.is_none() {
            self.initialize_model()?;
        }

        let total_epochs = self.config.epochs;
        let first_epoch = self.history.epochs() + 1;
        let best_path = self.save_dir.join(BEST_CHECKPOINT);
        let mut stopped_early = false;

        tracing::info!(
            from = first_epoch,
            to = total_epochs,
            save_dir = %self.save_dir.display(),
            "training started"
        );

        for epoch in first_epoch..=total_epochs {
            let train_loss = self.train_epoch()?;
            let val = self.evaluate()?;
            let learning_rate = self
                .session
                .as_ref()
                .map(|s| s.optimizer.learning_rate())
                .unwrap_or_default();
            self.history.record(train_loss, &val, learning_rate);

            let improved = val.auc > self.best_auc;
            if improved {
                self.best_auc = val.auc;
                self.epochs_without_improvement = 0;
                self.save_checkpoint(BEST_CHECKPOINT)?;
            } else {
                self.epochs_without_improvement += 1;
            }

            let report = EpochReport {
                epoch,
                total_epochs,
                train_loss,
                val,
                learning_rate,
                best_auc: self.best_auc,
                improved,
            };
            tracing::info!(
                epoch,
                train_loss,
                val_loss = val.loss,
                val_auc = val.auc,
                val_ap = val.ap,
                val_accuracy = val.accuracy,
                lr = learning_rate,
                "epoch finished"
            );
            on_epoch(&report);

            if self.config.checkpoint_every > 0 && epoch % self.config.checkpoint_every == 0 {
                self.save_checkpoint(&periodic_checkpoint_name(epoch))?;
            }
            if self.epochs_without_improvement >= self.config.patience {
                tracing::info!(epoch, patience = self.config.patience, "early stopping");
                stopped_early = true;
                break;
            }
        }

        let final_path = self.save_checkpoint(FINAL_CHECKPOINT)?;
        self.history.save_json(&self.save_dir.join(HISTORY_FILE))?;
        tracing::info!(
            epochs = self.history.epochs(),
            best_auc = self.best_auc,
            stopped_early,
            "training finished"
        );

        Ok(TrainingSummary {
            epochs_completed: self.history.epochs(),
            // No epoch ran when resuming at or past the epoch limit.
            best_auc: if self.best_auc.is_finite() { self.best_auc } else { 0.0 },
            stopped_early,
            best_checkpoint: best_path,
            final_checkpoint: final_path,
        })
    }
}

impl std::fmt::Debug for Trainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trainer")
            .field("config", &self.config)
            .field("model_config", &self.model_config)
            .field("save_dir", &self.save_dir)
            .field("epochs", &self.history.epochs())
            .field("best_auc", &self.best_auc)
            .finish()
    }
}

/// Mean binary cross-entropy of `probs` against (smoothed) `targets`.
fn bce_loss(probs: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let p = probs.clamp(LOSS_EPS, 1.0 - LOSS_EPS)?;
    let positive = (targets * p.log()?)?;
    let negative = (targets.affine(-1.0, 1.0)? * p.affine(-1.0, 1.0)?.log()?)?;
    (positive + negative)?.mean_all()?.neg()
}
