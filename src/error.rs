//! Rich diagnostic error types for the remedy engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so users know exactly what
//! went wrong and how to fix it.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the remedy engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text, source spans) through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum RemedyError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Train(#[from] TrainError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reason(#[from] ReasonError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Graph source errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("graph source unavailable: {message}")]
    #[diagnostic(
        code(remedy::graph::unavailable),
        help(
            "The knowledge graph source could not be reached. \
             Check the connection URI and credentials, or load a local graph file with `--graph`."
        )
    )]
    Unavailable { message: String },

    #[error("graph query failed: {message}")]
    #[diagnostic(
        code(remedy::graph::query),
        help("The graph store rejected the query. Check that the schema uses the expected labels.")
    )]
    Query { message: String },

    #[error("row is missing column '{column}'")]
    #[diagnostic(
        code(remedy::graph::missing_column),
        help("The graph source returned a row without a required column.")
    )]
    MissingColumn { column: String },

    #[error("unknown node '{id}' referenced by an edge")]
    #[diagnostic(
        code(remedy::graph::unknown_node),
        help("Every edge endpoint must be declared in the node list of the graph document.")
    )]
    UnknownNode { id: String },

    #[error("no {kind} with id '{id}' in the graph")]
    #[diagnostic(
        code(remedy::graph::not_found),
        help("Use `remedy diseases` or `remedy compounds` to list known ids.")
    )]
    NotFound { id: String, kind: String },

    #[error("failed to read graph document {path}")]
    #[diagnostic(
        code(remedy::graph::io),
        help("Check that the file exists and is readable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed graph document: {message}")]
    #[diagnostic(
        code(remedy::graph::parse),
        help("Graph documents are JSON objects with `nodes` and `edges` arrays.")
    )]
    Parse { message: String },
}

// ---------------------------------------------------------------------------
// Model errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("invalid model configuration: {message}")]
    #[diagnostic(
        code(remedy::model::invalid_config),
        help("Check the architecture settings. {message}")
    )]
    InvalidConfig { message: String },

    #[error("tensor operation failed: {message}")]
    #[diagnostic(
        code(remedy::model::tensor),
        help(
            "A tensor operation failed inside the encoder or scorer. \
             This usually means shapes disagree with the loaded architecture config."
        )
    )]
    Tensor { message: String },

    #[error("node index {index} out of range for a graph of {num_nodes} nodes")]
    #[diagnostic(
        code(remedy::model::index_range),
        help("Node indices must come from the identifier mapping the model was built with.")
    )]
    IndexOutOfRange { index: usize, num_nodes: usize },

    #[error("graph has no nodes")]
    #[diagnostic(
        code(remedy::model::empty_graph),
        help("Load nodes into the knowledge graph before building a model.")
    )]
    EmptyGraph,
}

impl From<candle_core::Error> for ModelError {
    fn from(e: candle_core::Error) -> Self {
        Self::Tensor {
            message: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("checkpoint not found: {path}")]
    #[diagnostic(
        code(remedy::checkpoint::not_found),
        help("Train a model first with `remedy train`, or point `checkpoint_dir` and `checkpoint_file` at an existing checkpoint.")
    )]
    NotFound { path: String },

    #[error("I/O error on checkpoint {path}")]
    #[diagnostic(
        code(remedy::checkpoint::io),
        help("Check that the checkpoint directory exists and has read/write permissions.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint {path}: {message}")]
    #[diagnostic(
        code(remedy::checkpoint::corrupt),
        help(
            "The checkpoint could not be decoded. It may be truncated or written by an \
             incompatible version. Retrain to produce a fresh checkpoint."
        )
    )]
    Corrupt { path: String, message: String },

    #[error("checkpoint is missing tensor '{name}'")]
    #[diagnostic(
        code(remedy::checkpoint::missing_tensor),
        help("The stored weights do not match the stored architecture config.")
    )]
    MissingTensor { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),
}

// ---------------------------------------------------------------------------
// Training errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum TrainError {
    #[error("training already in progress")]
    #[diagnostic(
        code(remedy::train::already_running),
        help("Wait for the running job to finish; poll the training status for progress.")
    )]
    AlreadyRunning,

    #[error("no positive (compound, disease) pairs found in the graph")]
    #[diagnostic(
        code(remedy::train::no_positives),
        help("The graph needs TREATS or PALLIATES edges from Compound to Disease nodes.")
    )]
    NoPositives,

    #[error("training stage '{stage}' was run out of order")]
    #[diagnostic(
        code(remedy::train::stage_order),
        help("Stages run as: load graph, load pairs, initialize model, train epochs, checkpoint.")
    )]
    StageOrder { stage: &'static str },

    #[error("invalid trainer configuration: {message}")]
    #[diagnostic(code(remedy::train::invalid_config), help("{message}"))]
    InvalidConfig { message: String },

    #[error("training worker panicked: {message}")]
    #[diagnostic(
        code(remedy::train::panicked),
        help("The run was abandoned; checkpoints written before the panic are intact.")
    )]
    Panicked { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),
}

impl From<candle_core::Error> for TrainError {
    fn from(e: candle_core::Error) -> Self {
        Self::Model(e.into())
    }
}

// ---------------------------------------------------------------------------
// Symbolic reasoning errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ReasonError {
    #[error("rule '{rule}' could not be evaluated: {message}")]
    #[diagnostic(
        code(remedy::reason::rule_eval),
        help("The metapath query for this rule failed against the graph source.")
    )]
    RuleEval { rule: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(remedy::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("failed to read config file {path}")]
    #[diagnostic(
        code(remedy::engine::config_read),
        help("Check that the config file exists and is readable.")
    )]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {path}")]
    #[diagnostic(
        code(remedy::engine::config_write),
        help("Check that the config directory exists and is writable.")
    )]
    ConfigWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    #[diagnostic(
        code(remedy::engine::config_parse),
        help("The config file must be valid TOML matching the EngineConfig layout.")
    )]
    ConfigParse { path: String, message: String },

    #[error("data directory error: {path}")]
    #[diagnostic(
        code(remedy::engine::data_dir),
        help(
            "The data directory could not be accessed. \
             Ensure the path exists and has read/write permissions."
        )
    )]
    DataDir { path: String },
}

/// Convenience alias for functions returning remedy results.
pub type RemedyResult<T> = std::result::Result<T, RemedyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_converts_to_remedy_error() {
        let err = GraphError::Unavailable {
            message: "connection refused".into(),
        };
        let remedy: RemedyError = err.into();
        assert!(matches!(
            remedy,
            RemedyError::Graph(GraphError::Unavailable { .. })
        ));
    }

    #[test]
    fn train_error_wraps_graph_error() {
        let err: TrainError = GraphError::MissingColumn {
            column: "id".into(),
        }
        .into();
        assert!(matches!(
            err,
            TrainError::Graph(GraphError::MissingColumn { .. })
        ));
    }

    #[test]
    fn tensor_error_maps_to_model_error() {
        let err = candle_core::Error::Msg("shape mismatch".into());
        let model: ModelError = err.into();
        assert!(matches!(model, ModelError::Tensor { .. }));
        assert!(format!("{model}").contains("shape mismatch"));
    }

    #[test]
    fn error_display_messages_are_descriptive() {
        let err = ModelError::IndexOutOfRange {
            index: 12,
            num_nodes: 10,
        };
        let msg = format!("{err}");
        assert!(msg.contains("12"));
        assert!(msg.contains("10"));
    }
}
