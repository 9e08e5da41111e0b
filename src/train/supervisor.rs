//! Background training with a pollable status record.
//!
//! The supervisor runs one [`Trainer`] at a time on its own thread. Serving
//! code only ever reads the published [`TrainingStatus`]; a second start while
//! a run is in flight is rejected with [`TrainError::AlreadyRunning`].

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};

use crate::error::TrainError;

use super::{EpochReport, TrainResult, Trainer, TrainingSummary};

/// Snapshot of the current (or last) training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStatus {
    pub is_training: bool,
    /// Percent of the epoch budget completed.
    pub progress: f32,
    pub current_epoch: usize,
    pub total_epochs: usize,
    pub best_auc: f32,
    pub message: String,
}

impl Default for TrainingStatus {
    fn default() -> Self {
        Self {
            is_training: false,
            progress: 0.0,
            current_epoch: 0,
            total_epochs: 0,
            best_auc: 0.0,
            message: "Not started".into(),
        }
    }
}

/// Clears the running flag however the worker exits.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct TrainingSupervisor {
    status: Arc<RwLock<TrainingStatus>>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<TrainResult<TrainingSummary>>>>,
}

impl TrainingSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> TrainingStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Start `trainer` on a background thread. `on_success` runs on that
    /// thread after the final checkpoint is written.
    pub fn start<F>(&self, mut trainer: Trainer, on_success: F) -> TrainResult<()>
    where
        F: FnOnce(&TrainingSummary) + Send + 'static,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TrainError::AlreadyRunning);
        }

        let total_epochs = trainer.config().epochs;
        *self.status.write().expect("status lock poisoned") = TrainingStatus {
            is_training: true,
            total_epochs,
            message: "Training started".into(),
            ..TrainingStatus::default()
        };

        let status = Arc::clone(&self.status);
        let guard = RunningGuard(Arc::clone(&self.running));
        let handle = std::thread::spawn(move || {
            let _guard = guard;
            let run = panic::catch_unwind(AssertUnwindSafe(|| {
                trainer.run(|report: &EpochReport| {
                    let mut s = status.write().unwrap_or_else(PoisonError::into_inner);
                    s.current_epoch = report.epoch;
                    s.progress = report.epoch as f32 / report.total_epochs.max(1) as f32 * 100.0;
                    s.best_auc = report.best_auc;
                    s.message = format!(
                        "Epoch {}/{}: loss={:.4}, val_auc={:.4}",
                        report.epoch, report.total_epochs, report.train_loss, report.val.auc
                    );
                })
            }));
            let result = run.unwrap_or_else(|payload| {
                Err(TrainError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            });

            match &result {
                Ok(summary) => {
                    {
                        let mut s = status.write().expect("status lock poisoned");
                        s.is_training = false;
                        s.progress = 100.0;
                        s.best_auc = summary.best_auc;
                        s.message = format!("Training complete. Best AUC: {:.4}", summary.best_auc);
                    }
                    on_success(summary);
                }
                Err(e) => {
                    tracing::error!(error = %e, "background training failed");
                    let mut s = status.write().unwrap_or_else(PoisonError::into_inner);
                    s.is_training = false;
                    s.message = format!("Training failed: {e}");
                }
            }
            result
        });

        *self.handle.lock().expect("handle lock poisoned") = Some(handle);
        Ok(())
    }

    /// Block until the current run finishes. `None` if nothing was started
    /// or the worker panicked.
    pub fn wait(&self) -> Option<TrainResult<TrainingSummary>> {
        let handle = self.handle.lock().expect("handle lock poisoned").take()?;
        handle.join().ok()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl std::fmt::Debug for TrainingSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingSupervisor")
            .field("running", &self.is_running())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, GraphQuery, GraphResult, GraphSource, KnowledgeGraph, NodeKind, Row};
    use crate::model::ModelConfig;
    use crate::train::TrainerConfig;
    use std::sync::atomic::AtomicUsize;

    fn trainer(dir: &std::path::Path, kg: KnowledgeGraph) -> Trainer {
        let config = TrainerConfig {
            epochs: 2,
            batch_size: 4,
            ..TrainerConfig::default()
        };
        let model = ModelConfig {
            embed_dim: 4,
            hidden_dim: 4,
            num_layers: 1,
            num_heads: 2,
            dropout: 0.0,
            ..ModelConfig::default()
        };
        Trainer::new(config, model, Arc::new(kg), dir).unwrap()
    }

    fn graph() -> KnowledgeGraph {
        let kg = KnowledgeGraph::new();
        for id in ["C0", "C1", "C2"] {
            kg.insert_node(GraphNode::new(id, NodeKind::Compound));
        }
        for id in ["D0", "D1"] {
            kg.insert_node(GraphNode::new(id, NodeKind::Disease));
        }
        kg.insert_edge("C0", "TREATS", "D0").unwrap();
        kg.insert_edge("C1", "TREATS", "D1").unwrap();
        kg
    }

    #[test]
    fn idle_status() {
        let sup = TrainingSupervisor::new();
        let s = sup.status();
        assert!(!s.is_training);
        assert_eq!(s.message, "Not started");
        assert!(sup.wait().is_none());
    }

    #[test]
    fn runs_to_completion_and_calls_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let sup = TrainingSupervisor::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        sup.start(trainer(dir.path(), graph()), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let summary = sup.wait().unwrap().unwrap();
        assert_eq!(summary.epochs_completed, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!sup.is_running());

        let s = sup.status();
        assert!(!s.is_training);
        assert_eq!(s.current_epoch, 2);
        assert_eq!(s.progress, 100.0);
        assert!(s.message.starts_with("Training complete"));
    }

    #[test]
    fn second_start_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let sup = TrainingSupervisor::new();
        sup.running.store(true, Ordering::SeqCst);
        let err = sup.start(trainer(dir.path(), graph()), |_| {}).unwrap_err();
        assert!(matches!(err, TrainError::AlreadyRunning));
    }

    struct PanickingSource;

    impl GraphSource for PanickingSource {
        fn query(&self, _query: &GraphQuery<'_>) -> GraphResult<Vec<Row>> {
            panic!("graph backend crashed")
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    #[test]
    fn panicking_run_is_reported_as_failed() {
        let dir = tempfile::TempDir::new().unwrap();
        let trainer = Trainer::new(
            TrainerConfig::default(),
            ModelConfig::default(),
            Arc::new(PanickingSource),
            dir.path(),
        )
        .unwrap();
        let sup = TrainingSupervisor::new();
        sup.start(trainer, |_| panic!("must not be called")).unwrap();

        match sup.wait() {
            Some(Err(TrainError::Panicked { message })) => {
                assert_eq!(message, "graph backend crashed");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!sup.is_running());
        let s = sup.status();
        assert!(!s.is_training);
        assert!(s.message.starts_with("Training failed"));
        assert!(s.message.contains("graph backend crashed"));
    }

    #[test]
    fn failure_is_reported_in_status() {
        let dir = tempfile::TempDir::new().unwrap();
        let kg = KnowledgeGraph::new();
        kg.insert_node(GraphNode::new("C0", NodeKind::Compound));
        kg.insert_node(GraphNode::new("D0", NodeKind::Disease));
        let sup = TrainingSupervisor::new();
        sup.start(trainer(dir.path(), kg), |_| panic!("must not be called"))
            .unwrap();
        assert!(matches!(sup.wait(), Some(Err(TrainError::NoPositives))));
        let s = sup.status();
        assert!(!s.is_training);
        assert!(s.message.starts_with("Training failed"));
    }
}
