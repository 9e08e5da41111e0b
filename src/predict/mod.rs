//! Model lifecycle: checkpoint loading, inference, fallback and caching.
//!
//! A [`ModelManager`] moves through `Unloaded -> Loading -> {Ready, Fallback}`.
//! Loading reads a checkpoint, rebuilds the edge tensors from the live graph
//! source and precomputes the embeddings of every node. Any failure leaves the
//! manager in `Fallback`, where every prediction is a deterministic surrogate.
//!
//! The active model sits behind an `RwLock<Arc<_>>`. Readers clone the `Arc`
//! and run against that snapshot, so a reload swaps the whole model in one
//! write and in-flight predictions finish on the state they started with.

pub mod resolve;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use candle_core::{Device, Tensor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheStats, MemoCache, PairKey, pair_key};
use crate::error::{CheckpointError, RemedyResult};
use crate::graph::{GraphSource, fetch_edges};
use crate::model::{Checkpoint, DrugRepurposingModel, GraphTensors, IdMapping};

pub use resolve::{COMPOUND_STRATEGIES, DISEASE_STRATEGIES, IdStrategy, resolve, surrogate_score};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Lifecycle state of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready,
    Fallback,
}

/// Confidence label derived from a score's distance to 0.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// `|score - 0.5| * 2 > 0.7` is high, `> 0.4` medium, otherwise low.
    pub fn from_score(score: f32) -> Self {
        let certainty = (score - 0.5).abs() * 2.0;
        if certainty > 0.7 {
            Self::High
        } else if certainty > 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which path produced a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    TrainedGnn,
    FallbackHash,
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TrainedGnn => "trained_gnn",
            Self::FallbackHash => "fallback_hash",
        })
    }
}

/// Why a surrogate was returned instead of a model score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// A model is loaded but one of the ids is not in its mapping.
    NodeNotInGraph,
    /// No model is loaded.
    TrainedModelNotLoaded,
    /// A model is loaded and both ids resolved, but scoring the pair failed.
    ScoringFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub score: f32,
    pub confidence: Confidence,
    pub model_type: ModelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<FallbackReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disease_index: Option<usize>,
}

impl Prediction {
    fn surrogate(compound_id: &str, disease_id: &str, reason: FallbackReason) -> Self {
        Self {
            score: surrogate_score(compound_id, disease_id),
            confidence: Confidence::Low,
            model_type: ModelKind::FallbackHash,
            note: Some(reason),
            compound_index: None,
            disease_index: None,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.model_type == ModelKind::FallbackHash
    }
}

/// `loaded` when a trained model serves predictions, `no_trained_model` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Loaded,
    NoTrainedModel,
}

impl ModelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::NoTrainedModel => "no_trained_model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_type: String,
    pub status: ModelStatus,
    pub state: ModelState,
    pub checkpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_nodes: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_edges: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model:      {}", self.model_type)?;
        writeln!(f, "status:     {}", self.status.as_str())?;
        writeln!(f, "checkpoint: {}", self.checkpoint)?;
        if let Some(device) = &self.device {
            writeln!(f, "device:     {device}")?;
        }
        if let (Some(nodes), Some(edges)) = (self.num_nodes, self.num_edges) {
            writeln!(f, "graph:      {nodes} nodes, {edges} edges")?;
        }
        if let Some(at) = self.trained_at {
            writeln!(f, "trained:    {}", at.to_rfc3339())?;
        }
        if let Some(message) = &self.message {
            writeln!(f, "note:       {message}")?;
        }
        Ok(())
    }
}

/// Prediction cache counters plus the active mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorCacheStats {
    #[serde(flatten)]
    pub cache: CacheStats,
    pub using_trained_model: bool,
}

// ---------------------------------------------------------------------------
// Loaded model
// ---------------------------------------------------------------------------

/// Everything needed to serve a trained model.
struct LoadedModel {
    model: DrugRepurposingModel,
    mapping: IdMapping,
    /// `[N, embed_dim]`, precomputed with a full-graph forward pass.
    embeddings: Tensor,
    num_edges: usize,
    trained_at: DateTime<Utc>,
}

impl LoadedModel {
    fn load(path: &Path, source: &dyn GraphSource, device: &Device) -> RemedyResult<Self> {
        let checkpoint = Checkpoint::load(path)?;
        let model = checkpoint.build_model(device)?;
        let edges = fetch_edges(source)?;
        let graph = GraphTensors::build(
            &checkpoint.mapping,
            &edges,
            checkpoint.config.num_relations,
            device,
        )?;
        let embeddings = model.encode(&graph, false)?;
        Ok(Self {
            model,
            mapping: checkpoint.mapping,
            embeddings,
            num_edges: graph.num_edges,
            trained_at: checkpoint.timestamp,
        })
    }

    fn score(&self, compound: usize, disease: usize) -> RemedyResult<f32> {
        let scores = self
            .model
            .score_pairs(&self.embeddings, &[(compound, disease)])?;
        Ok(scores.first().copied().unwrap_or_default())
    }
}

enum Active {
    Unloaded,
    Ready(LoadedModel),
    Fallback { reason: String },
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct ModelManager {
    checkpoint_path: PathBuf,
    source: Arc<dyn GraphSource>,
    device: Device,
    active: RwLock<Arc<Active>>,
    loading: AtomicBool,
    reload_lock: Mutex<()>,
    cache: MemoCache<PairKey, Prediction>,
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("checkpoint_path", &self.checkpoint_path)
            .field("source", &self.source.name())
            .field("state", &self.state())
            .finish()
    }
}

impl ModelManager {
    /// Create an unloaded manager. Call [`ModelManager::reload`] to load.
    pub fn new(checkpoint_path: impl Into<PathBuf>, source: Arc<dyn GraphSource>) -> Self {
        Self {
            checkpoint_path: checkpoint_path.into(),
            source,
            device: Device::Cpu,
            active: RwLock::new(Arc::new(Active::Unloaded)),
            loading: AtomicBool::new(false),
            reload_lock: Mutex::new(()),
            cache: MemoCache::new(),
        }
    }

    /// Create and immediately attempt a load.
    pub fn open(checkpoint_path: impl Into<PathBuf>, source: Arc<dyn GraphSource>) -> Self {
        let manager = Self::new(checkpoint_path, source);
        manager.reload();
        manager
    }

    pub fn checkpoint_path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn state(&self) -> ModelState {
        if self.loading.load(Ordering::Acquire) {
            return ModelState::Loading;
        }
        match self.snapshot().as_ref() {
            Active::Unloaded => ModelState::Unloaded,
            Active::Ready(_) => ModelState::Ready,
            Active::Fallback { .. } => ModelState::Fallback,
        }
    }

    pub fn is_using_trained_model(&self) -> bool {
        matches!(self.snapshot().as_ref(), Active::Ready(_))
    }

    fn snapshot(&self) -> Arc<Active> {
        Arc::clone(&self.active.read().expect("model lock poisoned"))
    }

    /// Load the checkpoint and swap it in. Never fails: any error leaves the
    /// manager in `Fallback`. Concurrent reloads run one at a time.
    pub fn reload(&self) -> ModelState {
        let _guard = self.reload_lock.lock().expect("reload lock poisoned");
        self.loading.store(true, Ordering::Release);
        tracing::info!(checkpoint = %self.checkpoint_path.display(), "loading model");

        let next = match LoadedModel::load(&self.checkpoint_path, self.source.as_ref(), &self.device)
        {
            Ok(loaded) => {
                tracing::info!(
                    nodes = loaded.mapping.len(),
                    edges = loaded.num_edges,
                    trained_at = %loaded.trained_at.to_rfc3339(),
                    "trained model ready"
                );
                Active::Ready(loaded)
            }
            Err(crate::error::RemedyError::Checkpoint(CheckpointError::NotFound { path })) => {
                tracing::info!(%path, "no trained model found, using fallback predictions");
                Active::Fallback {
                    reason: format!("no checkpoint at {path}"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "could not load trained model, using fallback predictions");
                Active::Fallback {
                    reason: e.to_string(),
                }
            }
        };

        *self.active.write().expect("model lock poisoned") = Arc::new(next);
        self.loading.store(false, Ordering::Release);
        self.state()
    }

    /// Treatment probability for a pair.
    pub fn predict(&self, compound_id: &str, disease_id: &str) -> f32 {
        self.predict_with_confidence(compound_id, disease_id).score
    }

    /// Score, confidence and provenance for a pair. Cached per normalized pair.
    pub fn predict_with_confidence(&self, compound_id: &str, disease_id: &str) -> Prediction {
        let active = self.snapshot();
        self.predict_on(&active, compound_id, disease_id)
    }

    /// Scores for many pairs against one model snapshot.
    pub fn predict_batch(&self, pairs: &[(String, String)]) -> Vec<f32> {
        self.predict_batch_with_confidence(pairs)
            .into_iter()
            .map(|p| p.score)
            .collect()
    }

    pub fn predict_batch_with_confidence(&self, pairs: &[(String, String)]) -> Vec<Prediction> {
        let active = self.snapshot();
        pairs
            .iter()
            .map(|(compound, disease)| self.predict_on(&active, compound, disease))
            .collect()
    }

    fn predict_on(&self, active: &Active, compound_id: &str, disease_id: &str) -> Prediction {
        let key = pair_key(compound_id, disease_id);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }
        let prediction = Self::compute(active, compound_id, disease_id);
        self.cache.insert(key, prediction.clone());
        prediction
    }

    fn compute(active: &Active, compound_id: &str, disease_id: &str) -> Prediction {
        let Active::Ready(loaded) = active else {
            return Prediction::surrogate(
                compound_id,
                disease_id,
                FallbackReason::TrainedModelNotLoaded,
            );
        };

        let compound = resolve(&loaded.mapping, compound_id, COMPOUND_STRATEGIES);
        let disease = resolve(&loaded.mapping, disease_id, DISEASE_STRATEGIES);
        let (Some(compound), Some(disease)) = (compound, disease) else {
            tracing::debug!(compound_id, disease_id, "node not in trained graph");
            return Prediction::surrogate(compound_id, disease_id, FallbackReason::NodeNotInGraph);
        };

        match loaded.score(compound, disease) {
            Ok(score) => Prediction {
                score,
                confidence: Confidence::from_score(score),
                model_type: ModelKind::TrainedGnn,
                note: None,
                compound_index: Some(compound),
                disease_index: Some(disease),
            },
            Err(e) => {
                tracing::warn!(error = %e, compound_id, disease_id, "scoring failed");
                Prediction::surrogate(compound_id, disease_id, FallbackReason::ScoringFailed)
            }
        }
    }

    pub fn model_info(&self) -> ModelInfo {
        let state = self.state();
        let checkpoint = self.checkpoint_path.display().to_string();
        match self.snapshot().as_ref() {
            Active::Ready(loaded) => ModelInfo {
                model_type: "Trained DrugRepurposingGNN".into(),
                status: ModelStatus::Loaded,
                state,
                checkpoint,
                device: Some(format!("{:?}", self.device)),
                num_nodes: Some(loaded.mapping.len()),
                num_edges: Some(loaded.num_edges),
                trained_at: Some(loaded.trained_at),
                message: None,
            },
            Active::Fallback { reason } => ModelInfo {
                model_type: "Fallback (hash-based)".into(),
                status: ModelStatus::NoTrainedModel,
                state,
                checkpoint,
                device: None,
                num_nodes: None,
                num_edges: None,
                trained_at: None,
                message: Some(format!("{reason}; run training to get model predictions")),
            },
            Active::Unloaded => ModelInfo {
                model_type: "Fallback (hash-based)".into(),
                status: ModelStatus::NoTrainedModel,
                state,
                checkpoint,
                device: None,
                num_nodes: None,
                num_edges: None,
                trained_at: None,
                message: Some("model not loaded yet".into()),
            },
        }
    }

    pub fn cache_stats(&self) -> PredictorCacheStats {
        PredictorCacheStats {
            cache: self.cache.stats(),
            using_trained_model: self.is_using_trained_model(),
        }
    }

    /// Drop all cached predictions and reset the counters.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::KnowledgeGraph;

    fn manager_without_checkpoint() -> (tempfile::TempDir, ModelManager) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("best_model.ckpt");
        let manager = ModelManager::open(path, Arc::new(KnowledgeGraph::new()));
        (dir, manager)
    }

    #[test]
    fn confidence_thresholds() {
        assert_eq!(Confidence::from_score(0.95), Confidence::High);
        assert_eq!(Confidence::from_score(0.05), Confidence::High);
        assert_eq!(Confidence::from_score(0.8), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.7), Confidence::Low);
        assert_eq!(Confidence::from_score(0.5), Confidence::Low);
    }

    #[test]
    fn new_manager_is_unloaded() {
        let manager = ModelManager::new("/nonexistent/model.ckpt", Arc::new(KnowledgeGraph::new()));
        assert_eq!(manager.state(), ModelState::Unloaded);
        assert_eq!(manager.model_info().status, ModelStatus::NoTrainedModel);
    }

    #[test]
    fn missing_checkpoint_falls_back() {
        let (_dir, manager) = manager_without_checkpoint();
        assert_eq!(manager.state(), ModelState::Fallback);
        assert!(!manager.is_using_trained_model());
        let info = manager.model_info();
        assert_eq!(info.status.as_str(), "no_trained_model");

        let p = manager.predict_with_confidence("DB00945", "DOID:9352");
        assert_eq!(p.confidence, Confidence::Low);
        assert_eq!(p.model_type, ModelKind::FallbackHash);
        assert_eq!(p.note, Some(FallbackReason::TrainedModelNotLoaded));
        assert_eq!(p.score, surrogate_score("DB00945", "DOID:9352"));
    }

    #[test]
    fn corrupt_checkpoint_falls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("best_model.ckpt");
        std::fs::write(&path, b"garbage").unwrap();
        let manager = ModelManager::open(&path, Arc::new(KnowledgeGraph::new()));
        assert_eq!(manager.state(), ModelState::Fallback);
        assert!(manager.model_info().message.is_some());
    }

    #[test]
    fn predictions_are_cached_by_normalized_pair() {
        let (_dir, manager) = manager_without_checkpoint();
        let a = manager.predict("DB00945", "DOID:9352");
        let b = manager.predict("  db00945", "doid:9352");
        assert_eq!(a, b);
        let stats = manager.cache_stats();
        assert_eq!(stats.cache.size, 1);
        assert_eq!(stats.cache.hits, 1);
        assert_eq!(stats.cache.misses, 1);
        assert!(!stats.using_trained_model);

        manager.clear_cache();
        assert!(manager.cache_stats().cache.is_empty());
    }

    #[test]
    fn colon_ids_are_cached_separately() {
        let (_dir, manager) = manager_without_checkpoint();
        let a = manager.predict("x", "y:z");
        let b = manager.predict("x:y", "z");
        assert_eq!(a, surrogate_score("x", "y:z"));
        assert_eq!(b, surrogate_score("x:y", "z"));
        assert_eq!(manager.cache_stats().cache.size, 2);
    }

    #[test]
    fn scoring_failure_is_not_reported_as_unloaded() {
        use crate::graph::{GraphNode, NodeKind, Relation};
        use crate::model::ModelConfig;
        use candle_core::DType;

        // The mapping knows three nodes, the model only two.
        let mapping = IdMapping::from_nodes(&[
            GraphNode::new("C0", NodeKind::Compound),
            GraphNode::new("D0", NodeKind::Disease),
            GraphNode::new("D1", NodeKind::Disease),
        ]);
        let config = ModelConfig {
            embed_dim: 8,
            hidden_dim: 8,
            num_layers: 1,
            num_heads: 2,
            num_nodes: 2,
            num_relations: Relation::COUNT,
            ..ModelConfig::default()
        };
        let (model, _vars) = DrugRepurposingModel::trainable(config, &Device::Cpu).unwrap();
        let active = Active::Ready(LoadedModel {
            model,
            mapping,
            embeddings: Tensor::zeros((2, 8), DType::F32, &Device::Cpu).unwrap(),
            num_edges: 0,
            trained_at: Utc::now(),
        });

        let p = ModelManager::compute(&active, "C0", "D1");
        assert_eq!(p.note, Some(FallbackReason::ScoringFailed));
        assert_eq!(p.model_type, ModelKind::FallbackHash);
        assert_eq!(p.score, surrogate_score("C0", "D1"));

        let ok = ModelManager::compute(&active, "C0", "D0");
        assert_eq!(ok.model_type, ModelKind::TrainedGnn);
        assert_eq!(ok.note, None);
    }

    #[test]
    fn batch_matches_single_predictions() {
        let (_dir, manager) = manager_without_checkpoint();
        let pairs = vec![
            ("C1".to_string(), "D1".to_string()),
            ("C2".to_string(), "D1".to_string()),
        ];
        let batch = manager.predict_batch(&pairs);
        assert_eq!(batch, vec![manager.predict("C1", "D1"), manager.predict("C2", "D1")]);
    }
}
