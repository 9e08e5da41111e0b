//! Validation metrics and the per-epoch training history.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Probabilities are clamped away from 0 and 1 before taking logs.
const PROB_EPS: f32 = 1e-7;

/// Metrics of one validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalMetrics {
    pub loss: f32,
    pub accuracy: f32,
    pub auc: f32,
    pub ap: f32,
}

/// Mean binary cross-entropy of `probs` against `labels`.
pub fn binary_cross_entropy(labels: &[f32], probs: &[f32]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let total: f32 = labels
        .iter()
        .zip(probs)
        .map(|(&y, &p)| {
            let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
            -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
        })
        .sum();
    total / labels.len() as f32
}

/// Fraction of pairs where `score > 0.5` agrees with the label.
pub fn accuracy(labels: &[f32], scores: &[f32]) -> f32 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels
        .iter()
        .zip(scores)
        .filter(|&(&y, &s)| (s > 0.5) == (y > 0.5))
        .count();
    correct as f32 / labels.len() as f32
}

fn class_counts(labels: &[f32]) -> (usize, usize) {
    let pos = labels.iter().filter(|&&y| y > 0.5).count();
    (pos, labels.len() - pos)
}

/// Area under the ROC curve via the rank statistic, averaging tied ranks.
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(labels: &[f32], scores: &[f32]) -> f32 {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties share the mean rank of their run.
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if labels[k] > 0.5 {
                rank_sum_pos += mean_rank;
            }
        }
        i = j + 1;
    }

    let pos = pos as f64;
    let neg = neg as f64;
    ((rank_sum_pos - pos * (pos + 1.0) / 2.0) / (pos * neg)) as f32
}

/// Average precision: `sum_n (R_n - R_{n-1}) * P_n` over descending score
/// thresholds, with tied scores forming one threshold.
///
/// Returns 0.5 when only one class is present.
pub fn average_precision(labels: &[f32], scores: &[f32]) -> f32 {
    let (pos, neg) = class_counts(labels);
    if pos == 0 || neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ap = 0.0f64;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] > 0.5 {
                tp += 1;
            }
            seen += 1;
            i += 1;
        }
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap as f32
}

/// Compute all validation metrics for one pass.
pub fn evaluate_scores(labels: &[f32], scores: &[f32]) -> EvalMetrics {
    EvalMetrics {
        loss: binary_cross_entropy(labels, scores),
        accuracy: accuracy(labels, scores),
        auc: roc_auc(labels, scores),
        ap: average_precision(labels, scores),
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Per-epoch record of a training run, one entry per completed epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f32>,
    pub val_loss: Vec<f32>,
    pub val_auc: Vec<f32>,
    pub val_ap: Vec<f32>,
    pub val_accuracy: Vec<f32>,
    pub learning_rate: Vec<f64>,
}

impl TrainingHistory {
    pub fn record(&mut self, train_loss: f32, val: &EvalMetrics, learning_rate: f64) {
        self.train_loss.push(train_loss);
        self.val_loss.push(val.loss);
        self.val_auc.push(val.auc);
        self.val_ap.push(val.ap);
        self.val_accuracy.push(val.accuracy);
        self.learning_rate.push(learning_rate);
    }

    /// Number of epochs recorded.
    pub fn epochs(&self) -> usize {
        self.train_loss.len()
    }

    pub fn best_auc(&self) -> Option<f32> {
        self.val_auc.iter().copied().reduce(f32::max)
    }

    /// Write as pretty JSON.
    pub fn save_json(&self, path: &Path) -> Result<(), CheckpointError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| CheckpointError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, text).map_err(|source| CheckpointError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}
