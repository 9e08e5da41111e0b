//! Identifier resolution and the deterministic surrogate score.

use std::borrow::Cow;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::cache::normalize_id;
use crate::model::IdMapping;

/// One way of spelling an external identifier when looking it up in the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    /// The id exactly as given.
    Raw,
    /// Trimmed and lowercased.
    Normalized,
    /// The raw id behind a fixed prefix, e.g. `Compound::` or `DB`.
    Prefixed(&'static str),
}

impl IdStrategy {
    pub fn apply<'a>(&self, id: &'a str) -> Cow<'a, str> {
        match self {
            Self::Raw => Cow::Borrowed(id),
            Self::Normalized => Cow::Owned(normalize_id(id)),
            Self::Prefixed(prefix) => Cow::Owned(format!("{prefix}{id}")),
        }
    }
}

/// Spellings tried, in order, for compound ids.
pub const COMPOUND_STRATEGIES: &[IdStrategy] = &[
    IdStrategy::Raw,
    IdStrategy::Normalized,
    IdStrategy::Prefixed("Compound::"),
    IdStrategy::Prefixed("DB"),
];

/// Spellings tried, in order, for disease ids.
pub const DISEASE_STRATEGIES: &[IdStrategy] = &[
    IdStrategy::Raw,
    IdStrategy::Normalized,
    IdStrategy::Prefixed("Disease::"),
];

/// First embedding index any strategy resolves `id` to.
pub fn resolve(mapping: &IdMapping, id: &str, strategies: &[IdStrategy]) -> Option<usize> {
    strategies
        .iter()
        .find_map(|strategy| mapping.get(&strategy.apply(id)))
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// 64-bit FNV-1a. Fixed constants, so the value never depends on the
/// toolchain or on per-process hasher keys.
fn fnv1a(bytes: impl IntoIterator<Item = u8>) -> u64 {
    bytes.into_iter().fold(FNV_OFFSET, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// Stable seed for a normalized pair. `0xff` never occurs in UTF-8, so it
/// separates the two ids unambiguously.
fn pair_seed(compound_id: &str, disease_id: &str) -> u64 {
    let compound = normalize_id(compound_id);
    let disease = normalize_id(disease_id);
    fnv1a(
        compound
            .bytes()
            .chain(std::iter::once(0xff))
            .chain(disease.bytes()),
    )
}

/// Reproducible pseudo-random score in `[0, 1)` for a pair.
///
/// Seeded from a fixed hash of the normalized pair and drawn from ChaCha8, so
/// the value is the same for every spelling that normalizes alike, across
/// process restarts and toolchain upgrades.
pub fn surrogate_score(compound_id: &str, disease_id: &str) -> f32 {
    let mut rng = ChaCha8Rng::seed_from_u64(pair_seed(compound_id, disease_id));
    rng.r#gen::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphNode, NodeKind};

    fn mapping() -> IdMapping {
        IdMapping::from_nodes(&[
            GraphNode::new("Compound::DB00945", NodeKind::Compound),
            GraphNode::new("db00316", NodeKind::Compound),
            GraphNode::new("DB01050", NodeKind::Compound),
            GraphNode::new("Disease::DOID:9352", NodeKind::Disease),
            GraphNode::new("DOID:1612", NodeKind::Disease),
        ])
    }

    #[test]
    fn strategies_are_tried_in_order() {
        let m = mapping();
        assert_eq!(resolve(&m, "DOID:1612", DISEASE_STRATEGIES), Some(4));
        assert_eq!(resolve(&m, "  DB00316 ", COMPOUND_STRATEGIES), Some(1));
        assert_eq!(resolve(&m, "DB00945", COMPOUND_STRATEGIES), Some(0));
        assert_eq!(resolve(&m, "01050", COMPOUND_STRATEGIES), Some(2));
        assert_eq!(resolve(&m, "DOID:9352", DISEASE_STRATEGIES), Some(3));
        assert_eq!(resolve(&m, "unknown", COMPOUND_STRATEGIES), None);
    }

    #[test]
    fn disease_ids_never_take_compound_prefixes() {
        let m = mapping();
        assert_eq!(resolve(&m, "01050", DISEASE_STRATEGIES), None);
    }

    #[test]
    fn fnv1a_matches_reference_vectors() {
        assert_eq!(fnv1a(*b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(*b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn pair_seed_separates_colon_ids() {
        assert_ne!(pair_seed("x", "y:z"), pair_seed("x:y", "z"));
        assert_ne!(surrogate_score("x", "y:z"), surrogate_score("x:y", "z"));
        assert_eq!(pair_seed(" X ", "Y:Z"), pair_seed("x", "y:z"));
    }

    #[test]
    fn surrogate_is_deterministic_and_normalized() {
        let a = surrogate_score("DB00945", "DOID:9352");
        let b = surrogate_score(" db00945", "doid:9352 ");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert_ne!(a, surrogate_score("DB00946", "DOID:9352"));
    }
}
