// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named stages of a [`SequentialClassifier`](super::SequentialClassifier).

use candle_core::{Module, Tensor};
use candle_nn::Linear;

use crate::config::Activation;
use crate::error::Result;

/// What a stage computes.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum StageKind {
    /// Affine projection `x W^T + b`.
    Dense(Linear),
    /// Element-wise activation.
    Activation(Activation),
    /// Collapse every dimension after the batch dimension.
    Flatten,
}

/// A named layer of a sequential classifier.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Layer name exposed to layer resolution.
    name: String,
    /// Computation performed by this stage.
    kind: StageKind,
}

impl Stage {
    /// Create a stage from a name and kind.
    pub fn new<S: Into<String>>(name: S, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Dense stage.
    pub fn dense<S: Into<String>>(name: S, linear: Linear) -> Self {
        Self::new(name, StageKind::Dense(linear))
    }

    /// Activation stage.
    pub fn activation<S: Into<String>>(name: S, activation: Activation) -> Self {
        Self::new(name, StageKind::Activation(activation))
    }

    /// Flatten stage.
    pub fn flatten<S: Into<String>>(name: S) -> Self {
        Self::new(name, StageKind::Flatten)
    }

    /// Stage name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage computation.
    #[must_use]
    pub const fn kind(&self) -> &StageKind {
        &self.kind
    }

    /// Run the stage.
    ///
    /// # Shapes
    /// - `x`: `[batch, ...]`
    /// - returns: `[batch, ...]` (`[batch, features]` for `Dense`/`Flatten`)
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Model`](crate::TcavError::Model) on tensor
    /// operation failures.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match &self.kind {
            StageKind::Dense(linear) => Ok(linear.forward(x)?),
            StageKind::Activation(activation) => apply_activation(x, *activation),
            StageKind::Flatten => Ok(x.flatten_from(1)?),
        }
    }
}

/// Apply the selected activation function.
fn apply_activation(x: &Tensor, activation: Activation) -> Result<Tensor> {
    match activation {
        Activation::Relu => Ok(x.relu()?),
        Activation::Gelu => Ok(x.gelu_erf()?),
        Activation::GeluApprox => Ok(x.gelu()?),
        Activation::Silu => Ok(candle_nn::ops::silu(x)?),
        Activation::Tanh => Ok(x.tanh()?),
    }
}
