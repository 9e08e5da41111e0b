//! Training pairs: observed treatments, sampled negatives, stratified split.

use std::collections::HashSet;

use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::graph::NodeKind;
use crate::model::IdMapping;

/// Negatives drawn per positive.
pub const NEGATIVE_RATIO: usize = 2;

/// Draw attempts allowed per requested negative.
pub const ATTEMPTS_PER_NEGATIVE: usize = 10;

/// A labelled `(compound, disease)` pair of embedding indices.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub compound: u32,
    pub disease: u32,
    pub label: f32,
}

impl TrainingPair {
    pub fn is_positive(&self) -> bool {
        self.label > 0.5
    }
}

/// Every observed treatment whose endpoints are both mapped.
pub fn positive_pairs(mapping: &IdMapping, treatments: &[(String, String)]) -> Vec<TrainingPair> {
    treatments
        .iter()
        .filter_map(|(compound, disease)| {
            Some(TrainingPair {
                compound: mapping.get(compound)? as u32,
                disease: mapping.get(disease)? as u32,
                label: 1.0,
            })
        })
        .collect()
}

/// Uniformly sample compound x disease pairs that are neither positive nor
/// already drawn.
///
/// Aims for `min(2 * positives, possible negatives)` pairs within a budget of
/// ten draws per requested pair; returns fewer when the budget runs out.
pub fn sample_negatives(
    mapping: &IdMapping,
    positives: &[TrainingPair],
    rng: &mut StdRng,
) -> Vec<TrainingPair> {
    let compounds = mapping.indices_of(NodeKind::Compound);
    let diseases = mapping.indices_of(NodeKind::Disease);
    if compounds.is_empty() || diseases.is_empty() {
        return Vec::new();
    }

    let mut taken: HashSet<(u32, u32)> =
        positives.iter().map(|p| (p.compound, p.disease)).collect();
    let possible = (compounds.len() * diseases.len()).saturating_sub(taken.len());
    let target = (positives.len() * NEGATIVE_RATIO).min(possible);
    let budget = target * ATTEMPTS_PER_NEGATIVE;

    let mut negatives = Vec::with_capacity(target);
    let mut attempts = 0;
    while negatives.len() < target && attempts < budget {
        let compound = compounds[rng.gen_range(0..compounds.len())] as u32;
        let disease = diseases[rng.gen_range(0..diseases.len())] as u32;
        if taken.insert((compound, disease)) {
            negatives.push(TrainingPair {
                compound,
                disease,
                label: 0.0,
            });
        }
        attempts += 1;
    }

    if negatives.len() < target {
        tracing::warn!(
            requested = target,
            sampled = negatives.len(),
            "negative sampling budget exhausted"
        );
    }
    negatives
}

/// Shuffle, then hold out `val_fraction` of each label class for validation.
pub fn stratified_split(
    mut pairs: Vec<TrainingPair>,
    val_fraction: f64,
    rng: &mut StdRng,
) -> (Vec<TrainingPair>, Vec<TrainingPair>) {
    pairs.shuffle(rng);
    let (positives, negatives): (Vec<_>, Vec<_>) =
        pairs.into_iter().partition(TrainingPair::is_positive);

    let mut train = Vec::new();
    let mut val = Vec::new();
    for class in [positives, negatives] {
        let n_val = ((class.len() as f64) * val_fraction).round() as usize;
        let n_val = n_val.min(class.len());
        let (held, kept) = class.split_at(n_val);
        val.extend_from_slice(held);
        train.extend_from_slice(kept);
    }
    train.shuffle(rng);
    val.shuffle(rng);
    (train, val)
}
