// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # remedy
//!
//! A neurosymbolic drug-repurposing engine: a relational graph neural network
//! scores (compound, disease) pairs over a biomedical knowledge graph, and a
//! fixed library of metapath rules supplies certain, human-readable evidence.
//!
//! ## Architecture
//!
//! - **Graph sources** (`graph`): Neo4j over HTTP, or an in-memory petgraph index, with
//!   listing and exploration queries (profiles, related entities, connecting paths)
//! - **Model** (`model`): attention-weighted relational encoder and pair scorer on candle
//! - **Training** (`train`): staged pipeline with early stopping, checkpoints and a background supervisor
//! - **Serving** (`predict`): checkpoint lifecycle with a deterministic fallback scorer
//! - **Symbolic reasoning** (`reason`): metapath rules evaluated against the graph
//! - **Ranking** (`rank`): score fusion, explanation and result caching
//!
//! ## Library usage
//!
//! ```no_run
//! use remedy::config::EngineConfig;
//! use remedy::engine::Engine;
//!
//! let config = EngineConfig {
//!     graph_file: Some("hetionet.json".into()),
//!     ..Default::default()
//! };
//! let engine = Engine::from_config(config).unwrap();
//! for candidate in engine.rank("DOID:9352", 10).unwrap() {
//!     println!("{} {:.3}", candidate.compound_id, candidate.score);
//! }
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod model;
pub mod paths;
pub mod predict;
pub mod rank;
pub mod reason;
pub mod train;
