// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sequential classifier backend.
//!
//! A [`SequentialClassifier`] is an ordered list of named [`Stage`]s
//! (dense projections, activations, flattening). Every stage output is a
//! layer in the sense of [`ConceptBackend::layer_names`], so any of them
//! can be captured or watched.

mod stage;

pub use stage::{Stage, StageKind};

use candle_core::{DType, Tensor};
use candle_nn::{Linear, VarBuilder};

use crate::backend::ConceptBackend;
use crate::config::ClassifierConfig;
use crate::error::{Result, TcavError};
use crate::hooks::{HookCache, HookSpec};

// ---------------------------------------------------------------------------
// SequentialClassifier
// ---------------------------------------------------------------------------

/// Feed-forward classifier evaluated stage by stage.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use candle_nn::Linear;
/// use candle_tcav::{Activation, ConceptBackend, HookSpec, SequentialClassifier, Stage};
///
/// let w = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], &Device::Cpu).unwrap();
/// let classifier = SequentialClassifier::new(vec![
///     Stage::dense("hidden", Linear::new(w.clone(), None)),
///     Stage::activation("relu", Activation::Relu),
///     Stage::dense("logits", Linear::new(w, None)),
/// ])
/// .unwrap();
///
/// let x = Tensor::new(&[[1f32, -1.0]], &Device::Cpu).unwrap();
/// let scores = classifier.forward(&x, &HookSpec::new()).unwrap().into_output();
/// assert_eq!(scores.to_vec2::<f32>().unwrap(), vec![vec![1.0, 0.0]]);
/// ```
pub struct SequentialClassifier {
    /// Stages in evaluation order.
    stages: Vec<Stage>,
}

impl SequentialClassifier {
    /// Build a classifier from explicit stages.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Config`] if there are no stages or two stages
    /// share a name.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(TcavError::Config("classifier needs at least one stage".into()));
        }
        for (i, stage) in stages.iter().enumerate() {
            let duplicate = stages
                .iter()
                .skip(i + 1)
                .any(|other| other.name() == stage.name());
            if duplicate {
                return Err(TcavError::Config(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }
        Ok(Self { stages })
    }

    /// Load classifier weights from a [`VarBuilder`].
    ///
    /// Dense layers are read from `dense_{i}.weight` / `dense_{i}.bias` and
    /// `logits.weight` / `logits.bias`.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Model`] if weight loading fails.
    #[allow(clippy::needless_pass_by_value)] // VarBuilder is candle's pass-by-value convention
    pub fn load(config: &ClassifierConfig, vb: VarBuilder<'_>) -> Result<Self> {
        let mut stages = Vec::with_capacity(2 * config.hidden_sizes.len() + 1);
        let mut in_dim = config.input_size;

        for (i, &width) in config.hidden_sizes.iter().enumerate() {
            let name = format!("dense_{i}");
            let linear = load_linear(in_dim, width, config.bias, vb.pp(&name))?;
            stages.push(Stage::dense(name, linear));
            stages.push(Stage::activation(
                format!("{}_{i}", config.activation.as_str()),
                config.activation,
            ));
            in_dim = width;
        }

        let head = load_linear(in_dim, config.num_classes, config.bias, vb.pp("logits"))?;
        stages.push(Stage::dense("logits", head));

        Self::new(stages)
    }

    /// Number of stages (layers).
    #[must_use]
    pub fn num_stages(&self) -> usize {
        self.stages.len()
    }

    /// Stages in evaluation order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }
}

// ---------------------------------------------------------------------------
// ConceptBackend implementation
// ---------------------------------------------------------------------------

impl ConceptBackend for SequentialClassifier {
    fn layer_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_owned()).collect()
    }

    fn forward(&self, inputs: &Tensor, hooks: &HookSpec) -> Result<HookCache> {
        // Capture cache -- output set at the end.
        let mut cache = HookCache::new(Tensor::zeros(1, DType::F32, inputs.device())?);

        let mut hidden = inputs.clone();
        for (index, stage) in self.stages.iter().enumerate() {
            hidden = stage.forward(&hidden)?;
            hidden = hooks.observe(index, hidden, &mut cache)?;
        }

        cache.set_output(hidden);
        Ok(cache)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load a linear layer with or without bias.
///
/// The loaded weights are detached: a `VarBuilder` backed by a `VarMap`
/// hands out variables, and a backward pass would otherwise compute a
/// gradient for every parameter on top of the watched activation.
#[allow(clippy::needless_pass_by_value)] // VarBuilder convention
fn load_linear(in_dim: usize, out_dim: usize, bias: bool, vb: VarBuilder<'_>) -> Result<Linear> {
    let linear = if bias {
        candle_nn::linear(in_dim, out_dim, vb)?
    } else {
        candle_nn::linear_no_bias(in_dim, out_dim, vb)?
    };
    Ok(Linear::new(
        linear.weight().detach(),
        linear.bias().map(Tensor::detach),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::collections::HashMap;

    use candle_core::Device;

    use super::*;
    use crate::config::Activation;

    fn eye3() -> Tensor {
        Tensor::new(
            &[[1f32, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            &Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn rejects_empty_and_duplicate_stages() {
        assert!(SequentialClassifier::new(Vec::new()).is_err());

        let dup = SequentialClassifier::new(vec![
            Stage::activation("act", Activation::Relu),
            Stage::activation("act", Activation::Tanh),
        ]);
        assert!(matches!(dup, Err(TcavError::Config(_))));
    }

    #[test]
    fn hooks_do_not_change_scores() {
        let classifier = SequentialClassifier::new(vec![
            Stage::dense("dense", Linear::new(eye3(), None)),
            Stage::activation("silu", Activation::Silu),
            Stage::dense("logits", Linear::new(eye3(), None)),
        ])
        .unwrap();
        let x = Tensor::new(&[[0.5f32, -1.5, 2.0], [1.0, 0.0, -0.25]], &Device::Cpu).unwrap();

        let plain = classifier.forward(&x, &HookSpec::new()).unwrap().into_output();
        let mut hooks = HookSpec::new();
        hooks.capture(0).watch(1);
        let hooked = classifier.forward(&x, &hooks).unwrap();

        assert_eq!(
            plain.to_vec2::<f32>().unwrap(),
            hooked.output().to_vec2::<f32>().unwrap()
        );
        assert_eq!(hooked.num_captures(), 1);
        assert!(hooked.watched(1).is_some());
    }

    #[test]
    fn load_from_var_builder() {
        let json = serde_json::json!({
            "input_size": 3,
            "hidden_sizes": [2],
            "num_classes": 2,
            "activation": "tanh",
            "bias": false
        });
        let config = ClassifierConfig::from_json(&json).unwrap();

        let mut tensors = HashMap::new();
        tensors.insert(
            "dense_0.weight".to_string(),
            Tensor::ones((2, 3), DType::F32, &Device::Cpu).unwrap(),
        );
        tensors.insert(
            "logits.weight".to_string(),
            Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap(),
        );
        let vb = VarBuilder::from_tensors(tensors, DType::F32, &Device::Cpu);

        let classifier = SequentialClassifier::load(&config, vb).unwrap();
        assert_eq!(classifier.layer_names(), vec!["dense_0", "tanh_0", "logits"]);

        let x = Tensor::zeros((4, 3), DType::F32, &Device::Cpu).unwrap();
        let scores = classifier.forward(&x, &HookSpec::new()).unwrap().into_output();
        assert_eq!(scores.dims(), &[4, 2]);
    }

    #[test]
    fn varmap_weights_are_frozen_on_load() {
        let json = serde_json::json!({
            "input_size": 3,
            "hidden_sizes": [4],
            "num_classes": 2
        });
        let config = ClassifierConfig::from_json(&json).unwrap();
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);

        let classifier = SequentialClassifier::load(&config, vb).unwrap();
        assert!(varmap.all_vars().iter().all(|v| v.as_tensor().is_variable()));

        let mut dense = 0;
        for stage in classifier.stages() {
            if let StageKind::Dense(linear) = stage.kind() {
                assert!(!linear.weight().is_variable(), "{}", stage.name());
                assert!(linear.bias().is_some_and(|b| !b.is_variable()));
                dense += 1;
            }
        }
        assert_eq!(dense, 2);
    }
}
