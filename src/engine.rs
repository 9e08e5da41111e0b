//! Engine facade: top-level API for the remedy system.
//!
//! The `Engine` is constructed once per process and owns every subsystem:
//! the graph source, the model lifecycle manager, the symbolic reasoner, the
//! ranking orchestrator and the training supervisor. Request handlers and the
//! CLI go through it; nothing in the crate holds global state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::config::EngineConfig;
use crate::error::{EngineError, GraphError, RemedyError, RemedyResult};
use crate::graph::{
    ConnectingPath, DiseaseSummary, GraphNode, GraphSource, GraphStats, KnowledgeGraph,
    Neo4jSource, NodeKind, RelatedEntity, SharedGene, SimilarDisease, fetch_connecting_paths,
    fetch_disease_summary, fetch_listing, fetch_node, fetch_related, fetch_shared_genes,
    fetch_similar_diseases, fetch_stats,
};
use crate::model::Checkpoint;
use crate::predict::{ModelInfo, ModelManager, ModelState, Prediction, PredictorCacheStats};
use crate::rank::{Orchestrator, RankedCandidate};
use crate::reason::{Explanation, SymbolicReasoner};
use crate::train::{EpochReport, Trainer, TrainingStatus, TrainingSummary, TrainingSupervisor};

/// Per-cache statistics, one entry per cache in the system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineCacheStats {
    /// Ranked-result cache.
    pub service: CacheStats,
    /// Prediction cache.
    pub gnn: PredictorCacheStats,
    /// Explanation cache.
    pub symbolic: CacheStats,
}

impl EngineCacheStats {
    pub fn is_empty(&self) -> bool {
        self.service.is_empty() && self.gnn.cache.is_empty() && self.symbolic.is_empty()
    }
}

impl std::fmt::Display for EngineCacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "service:  {}", self.service)?;
        writeln!(
            f,
            "gnn:      {} [{}]",
            self.gnn.cache,
            if self.gnn.using_trained_model {
                "trained"
            } else {
                "fallback"
            }
        )?;
        write!(f, "symbolic: {}", self.symbolic)
    }
}

/// Model, cache and training state in one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStatusReport {
    pub model: ModelInfo,
    pub cache: PredictorCacheStats,
    pub training: TrainingStatus,
}

/// Similar diseases and shared genes listed in a profile.
pub const PROFILE_SECTION_LIMIT: usize = 10;

/// Predicted indications listed in a profile.
pub const PROFILE_INDICATIONS: usize = 5;

/// A disease with its graph neighbourhood and best repurposing candidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiseaseProfile {
    pub summary: DiseaseSummary,
    pub indications: Vec<RankedCandidate>,
    pub similar_diseases: Vec<SimilarDisease>,
    pub shared_genes: Vec<SharedGene>,
}

/// Entities related to a compound or disease.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedReport {
    pub entity: GraphNode,
    pub related: Vec<RelatedEntity>,
}

/// Paths connecting a compound to a disease, by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathReport {
    pub compound: GraphNode,
    pub disease: GraphNode,
    pub paths: Vec<ConnectingPath>,
}

/// Per-run overrides for a training request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainRequest {
    pub epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    /// Continue from this checkpoint instead of starting fresh.
    pub resume_from: Option<PathBuf>,
}

/// The remedy drug-repurposing engine.
pub struct Engine {
    config: EngineConfig,
    source: Arc<dyn GraphSource>,
    checkpoint_dir: PathBuf,
    manager: Arc<ModelManager>,
    reasoner: Arc<SymbolicReasoner>,
    orchestrator: Orchestrator,
    supervisor: TrainingSupervisor,
}

impl Engine {
    /// Build over an explicit graph source and attempt to load the model.
    ///
    /// Configuration errors fail here. A missing or unreadable checkpoint
    /// does not: the engine starts in fallback mode.
    pub fn new(config: EngineConfig, source: Arc<dyn GraphSource>) -> RemedyResult<Self> {
        config.validate()?;
        let checkpoint_dir = config.resolve_checkpoint_dir()?;
        let checkpoint_path = config.resolve_checkpoint_path()?;

        tracing::info!(
            source = source.name(),
            checkpoint = %checkpoint_path.display(),
            "initializing remedy engine"
        );

        let manager = Arc::new(ModelManager::open(checkpoint_path, Arc::clone(&source)));
        let reasoner = Arc::new(SymbolicReasoner::new(Arc::clone(&source)));
        let orchestrator = Orchestrator::new(
            Arc::clone(&source),
            manager.clone(),
            reasoner.clone(),
            config.rank,
        );

        Ok(Self {
            config,
            source,
            checkpoint_dir,
            manager,
            reasoner,
            orchestrator,
            supervisor: TrainingSupervisor::new(),
        })
    }

    /// Build with the graph source named by the config: Neo4j when
    /// configured, otherwise the local graph document.
    pub fn from_config(config: EngineConfig) -> RemedyResult<Self> {
        let source = open_source(&config)?;
        Self::new(config, source)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn source(&self) -> &Arc<dyn GraphSource> {
        &self.source
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn model_manager(&self) -> &ModelManager {
        &self.manager
    }

    // -- prediction ----------------------------------------------------------

    pub fn predict(&self, compound_id: &str, disease_id: &str) -> f32 {
        self.manager.predict(compound_id, disease_id)
    }

    pub fn predict_with_confidence(&self, compound_id: &str, disease_id: &str) -> Prediction {
        self.manager.predict_with_confidence(compound_id, disease_id)
    }

    pub fn predict_batch(&self, pairs: &[(String, String)]) -> Vec<f32> {
        self.manager.predict_batch(pairs)
    }

    pub fn predict_batch_with_confidence(&self, pairs: &[(String, String)]) -> Vec<Prediction> {
        self.manager.predict_batch_with_confidence(pairs)
    }

    /// Top `top_k` repurposing candidates for a disease.
    pub fn rank(&self, disease_id: &str, top_k: usize) -> RemedyResult<Vec<RankedCandidate>> {
        self.orchestrator.rank(disease_id, top_k)
    }

    pub fn explain(&self, compound_id: &str, disease_id: &str) -> RemedyResult<Vec<Explanation>> {
        Ok(self.reasoner.explain(compound_id, disease_id)?)
    }

    pub fn explain_batch(&self, pairs: &[(String, String)]) -> RemedyResult<Vec<Vec<Explanation>>> {
        self.reasoner
            .explain_batch(pairs)
            .into_iter()
            .map(|r| r.map_err(Into::into))
            .collect()
    }

    // -- model lifecycle -----------------------------------------------------

    pub fn model_info(&self) -> ModelInfo {
        self.manager.model_info()
    }

    pub fn model_state(&self) -> ModelState {
        self.manager.state()
    }

    /// Reload the served checkpoint. Caches are left as they are.
    pub fn reload_model(&self) -> ModelInfo {
        self.manager.reload();
        self.manager.model_info()
    }

    pub fn model_status(&self) -> ModelStatusReport {
        ModelStatusReport {
            model: self.manager.model_info(),
            cache: self.manager.cache_stats(),
            training: self.supervisor.status(),
        }
    }

    // -- caches --------------------------------------------------------------

    pub fn cache_stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            service: self.orchestrator.cache_stats(),
            gnn: self.manager.cache_stats(),
            symbolic: self.reasoner.cache_stats(),
        }
    }

    /// Clear the result, prediction and explanation caches and their counters.
    pub fn clear_all_caches(&self) {
        self.orchestrator.clear_cache();
        self.manager.clear_cache();
        self.reasoner.clear_cache();
        tracing::info!("all caches cleared");
    }

    // -- training ------------------------------------------------------------

    fn trainer(&self, request: &TrainRequest) -> RemedyResult<Trainer> {
        let mut config = self.config.trainer.clone();
        if let Some(epochs) = request.epochs {
            config.epochs = epochs;
        }
        if let Some(batch_size) = request.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = request.learning_rate {
            config.learning_rate = lr;
        }
        let mut trainer = Trainer::new(
            config,
            self.config.model.clone(),
            Arc::clone(&self.source),
            &self.checkpoint_dir,
        )?;
        if let Some(path) = &request.resume_from {
            let checkpoint = Checkpoint::load(path)?;
            trainer.resume_from(&checkpoint)?;
        }
        Ok(trainer)
    }

    /// Train in the background. The served model is reloaded when the run
    /// finishes successfully.
    pub fn start_training(&self, request: TrainRequest) -> RemedyResult<()> {
        if self.supervisor.is_running() {
            return Err(crate::error::TrainError::AlreadyRunning.into());
        }
        let trainer = self.trainer(&request)?;
        let manager = Arc::clone(&self.manager);
        self.supervisor.start(trainer, move |summary| {
            tracing::info!(best_auc = summary.best_auc, "reloading model after training");
            manager.reload();
        })?;
        Ok(())
    }

    pub fn training_status(&self) -> TrainingStatus {
        self.supervisor.status()
    }

    /// Block until a background run started with [`Engine::start_training`] ends.
    pub fn wait_for_training(&self) -> Option<RemedyResult<TrainingSummary>> {
        self.supervisor
            .wait()
            .map(|result| result.map_err(Into::into))
    }

    /// Train on the calling thread, then reload the served model.
    pub fn train(
        &self,
        request: TrainRequest,
        on_epoch: impl FnMut(&EpochReport),
    ) -> RemedyResult<TrainingSummary> {
        if self.supervisor.is_running() {
            return Err(crate::error::TrainError::AlreadyRunning.into());
        }
        let summary = self.trainer(&request)?.run(on_epoch)?;
        self.manager.reload();
        Ok(summary)
    }

    // -- graph ---------------------------------------------------------------

    pub fn graph_stats(&self) -> RemedyResult<GraphStats> {
        Ok(fetch_stats(self.source.as_ref())?)
    }

    /// Diseases ordered by name.
    pub fn diseases(&self, limit: usize) -> RemedyResult<Vec<GraphNode>> {
        Ok(fetch_listing(self.source.as_ref(), NodeKind::Disease, limit)?)
    }

    /// Compounds ordered by name.
    pub fn compounds(&self, limit: usize) -> RemedyResult<Vec<GraphNode>> {
        Ok(fetch_listing(self.source.as_ref(), NodeKind::Compound, limit)?)
    }

    /// Look up a node, failing unless it exists with the given kind.
    fn require(&self, id: &str, kind: NodeKind) -> RemedyResult<GraphNode> {
        fetch_node(self.source.as_ref(), id)?
            .filter(|n| n.kind == kind)
            .ok_or_else(|| {
                RemedyError::from(GraphError::NotFound {
                    id: id.to_string(),
                    kind: kind.label().to_lowercase(),
                })
            })
    }

    pub fn disease_profile(&self, disease_id: &str) -> RemedyResult<DiseaseProfile> {
        let source = self.source.as_ref();
        let summary = fetch_disease_summary(source, disease_id)?.ok_or_else(|| {
            RemedyError::from(GraphError::NotFound {
                id: disease_id.to_string(),
                kind: "disease".into(),
            })
        })?;
        Ok(DiseaseProfile {
            indications: self.rank(disease_id, PROFILE_INDICATIONS)?,
            similar_diseases: fetch_similar_diseases(source, disease_id, PROFILE_SECTION_LIMIT)?,
            shared_genes: fetch_shared_genes(source, disease_id, PROFILE_SECTION_LIMIT)?,
            summary,
        })
    }

    /// Entities related to a compound or disease, up to `limit` per
    /// relation. Other kinds have no related entities.
    pub fn related(&self, id: &str, limit: usize) -> RemedyResult<RelatedReport> {
        let entity = fetch_node(self.source.as_ref(), id)?.ok_or_else(|| {
            RemedyError::from(GraphError::NotFound {
                id: id.to_string(),
                kind: "node".into(),
            })
        })?;
        let related = fetch_related(self.source.as_ref(), entity.kind, id, limit)?;
        Ok(RelatedReport { entity, related })
    }

    /// Paths from a compound to a disease, up to `limit` per category.
    pub fn connecting_paths(
        &self,
        compound_id: &str,
        disease_id: &str,
        limit: usize,
    ) -> RemedyResult<PathReport> {
        let compound = self.require(compound_id, NodeKind::Compound)?;
        let disease = self.require(disease_id, NodeKind::Disease)?;
        let paths = fetch_connecting_paths(self.source.as_ref(), compound_id, disease_id, limit)?;
        tracing::debug!(compound_id, disease_id, paths = paths.len(), "connecting paths");
        Ok(PathReport {
            compound,
            disease,
            paths,
        })
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("source", &self.source.name())
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("model", &self.manager.state())
            .finish()
    }
}

/// Open the graph source a config names.
pub fn open_source(config: &EngineConfig) -> RemedyResult<Arc<dyn GraphSource>> {
    if let Some(neo4j) = &config.neo4j {
        let source = Neo4jSource::new(neo4j.clone());
        if let Err(e) = source.verify_connectivity() {
            tracing::warn!(uri = %neo4j.uri, error = %e, "neo4j not reachable at startup");
        }
        return Ok(Arc::new(source));
    }
    if let Some(path) = &config.graph_file {
        let graph = KnowledgeGraph::load_json(path)?;
        tracing::info!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph document loaded"
        );
        return Ok(Arc::new(graph));
    }
    Err(EngineError::InvalidConfig {
        message: "no graph source configured: set `graph_file` or a `[neo4j]` section".into(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PathCategory;
    use crate::predict::{Confidence, ModelStatus};

    fn graph() -> Arc<dyn GraphSource> {
        let kg = KnowledgeGraph::new();
        kg.insert_node(GraphNode::new("DB01", NodeKind::Compound).with_name("Aspirin"));
        kg.insert_node(GraphNode::new("DB02", NodeKind::Compound));
        kg.insert_node(GraphNode::new("DOID:1", NodeKind::Disease));
        kg.insert_node(GraphNode::new("G1", NodeKind::Gene));
        kg.insert_edge("DB01", "BINDS", "G1").unwrap();
        kg.insert_edge("G1", "ASSOCIATES", "DOID:1").unwrap();
        kg.insert_edge("DB02", "TREATS", "DOID:1").unwrap();
        Arc::new(kg)
    }

    fn engine(dir: &Path) -> Engine {
        let config = EngineConfig {
            checkpoint_dir: Some(dir.to_path_buf()),
            ..Default::default()
        };
        Engine::new(config, graph()).unwrap()
    }

    #[test]
    fn starts_in_fallback_without_checkpoint() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        assert_eq!(engine.model_state(), ModelState::Fallback);
        assert_eq!(engine.model_info().status, ModelStatus::NoTrainedModel);
        let p = engine.predict_with_confidence("DB01", "DOID:1");
        assert_eq!(p.confidence, Confidence::Low);
    }

    #[test]
    fn clear_all_caches_resets_every_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        engine.rank("DOID:1", 5).unwrap();
        engine.explain("DB01", "DOID:1").unwrap();
        assert!(!engine.cache_stats().is_empty());

        engine.clear_all_caches();
        let stats = engine.cache_stats();
        assert!(stats.is_empty(), "{stats}");

        engine.predict("DB01", "DOID:1");
        assert_eq!(engine.cache_stats().gnn.cache.misses, 1);
    }

    #[test]
    fn graph_stats_count_kinds() {
        let dir = tempfile::TempDir::new().unwrap();
        let stats = engine(dir.path()).graph_stats().unwrap();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.relationships, 3);
        assert_eq!(stats.nodes_by_kind.get("Compound"), Some(&2));
    }

    #[test]
    fn listings_are_sorted_by_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        let ids: Vec<String> = engine.compounds(10).unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["DB01", "DB02"]);
        assert_eq!(engine.diseases(10).unwrap().len(), 1);
        assert!(engine.compounds(0).unwrap().is_empty());
    }

    #[test]
    fn disease_profile_includes_indications() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        let profile = engine.disease_profile("DOID:1").unwrap();
        assert_eq!(profile.summary.gene_count, 1);
        assert_eq!(profile.summary.treatment_count, 1);
        let ids: Vec<&str> = profile
            .indications
            .iter()
            .map(|c| c.compound_id.as_str())
            .collect();
        assert_eq!(ids, vec!["DB01"]);
        assert!(profile.similar_diseases.is_empty());

        let err = engine.disease_profile("DB01").unwrap_err();
        assert!(matches!(
            err,
            RemedyError::Graph(GraphError::NotFound { .. })
        ));
    }

    #[test]
    fn related_reports_the_entity_kind() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        let report = engine.related("G1", 5).unwrap();
        assert_eq!(report.entity.kind, NodeKind::Gene);
        assert!(report.related.is_empty());
        assert!(engine.related("missing", 5).is_err());
    }

    #[test]
    fn connecting_paths_check_both_ends() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = engine(dir.path());
        let report = engine.connecting_paths("DB01", "DOID:1", 5).unwrap();
        assert_eq!(report.compound.name.as_deref(), Some("Aspirin"));
        assert_eq!(report.paths.len(), 1);
        assert_eq!(report.paths[0].category, PathCategory::GeneMediated);

        let err = engine.connecting_paths("DOID:1", "DB01", 5).unwrap_err();
        assert!(err.to_string().contains("no compound with id 'DOID:1'"));
    }

    #[test]
    fn from_config_requires_a_source() {
        let err = Engine::from_config(EngineConfig::default()).unwrap_err();
        assert!(err.to_string().contains("no graph source"));
    }
}
