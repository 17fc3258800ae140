// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for candle-tcav.

/// Errors that can occur while resolving layers or scoring concepts.
#[derive(Debug, thiserror::Error)]
pub enum TcavError {
    /// Forward/backward pass or tensor operation error (wraps candle).
    #[error("model error: {0}")]
    Model(#[from] candle_core::Error),

    /// The layer identifier matches no layer of the model.
    #[error("layer not found: {0}")]
    LayerNotFound(String),

    /// The layer is already being watched by another recording.
    #[error("layer `{0}` is already being watched")]
    AlreadyWatching(String),

    /// The concept vector does not match the layer's per-sample activation shape.
    #[error("concept vector shape {actual:?} does not match activation shape {expected:?} of layer `{layer}`")]
    ShapeMismatch {
        /// Name of the watched layer.
        layer: String,
        /// Per-sample activation shape (batch dimension removed).
        expected: Vec<usize>,
        /// Shape of the supplied concept vector.
        actual: Vec<usize>,
    },

    /// The class index is outside the model's output scores.
    #[error("label {label} out of range for {num_classes} classes")]
    InvalidLabel {
        /// Requested class index.
        label: usize,
        /// Number of classes in the model output.
        num_classes: usize,
    },

    /// No samples to score.
    #[error("cannot score an empty input collection")]
    EmptyInput,

    /// Hook capture or lookup error.
    #[error("hook error: {0}")]
    Hook(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for candle-tcav operations.
pub type Result<T> = std::result::Result<T, TcavError>;
