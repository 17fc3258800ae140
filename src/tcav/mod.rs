// SPDX-License-Identifier: MIT OR Apache-2.0

//! Testing with Concept Activation Vectors.
//!
//! [`Tcav`] scores how often nudging a layer's activation along a concept
//! direction increases a class score: the fraction of inputs whose
//! directional derivative is strictly positive.
//!
//! - [`resolve_layer`] -- find the target layer by name or index.
//! - [`ActivationRecorder`] -- exclusive, scoped watching of that layer.
//! - [`directional_derivative`] -- per-sample sensitivity for one batch.
//! - [`Tcav`] -- batched scoring over an arbitrary input collection.
//!
//! Ref. Kim et al., *Interpretability Beyond Feature Attribution: Quantitative
//! Testing with Concept Activation Vectors (TCAV)*, 2018.

mod derivative;
mod recorder;
mod resolver;

pub use derivative::{directional_derivative, project_onto_cav, select_class};
pub use recorder::{ActivationRecorder, Recording};
pub use resolver::{Layer, resolve_layer};

use candle_core::Tensor;

use crate::backend::ConceptModel;
use crate::config::TcavConfig;
use crate::error::{Result, TcavError};
use crate::hooks::LayerId;
use crate::util::batching::batch_tensor;

/// Batch size used when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 64;

// ---------------------------------------------------------------------------
// TcavReport
// ---------------------------------------------------------------------------

/// Result of scoring one concept vector against one class.
#[derive(Debug, Clone, PartialEq)]
pub struct TcavReport {
    /// Fraction of samples with a strictly positive directional derivative.
    pub score: f64,
    /// Number of samples with a strictly positive directional derivative.
    pub positive: usize,
    /// Number of samples scored.
    pub total: usize,
    /// Per-sample directional derivatives, in input order.
    pub directional_derivatives: Vec<f64>,
}

impl TcavReport {
    /// Aggregate per-sample directional derivatives.
    ///
    /// Exact zeros and NaN are not positive but still count as samples.
    ///
    /// # Example
    ///
    /// ```
    /// use candle_tcav::TcavReport;
    ///
    /// let report = TcavReport::from_derivatives(vec![0.5, -1.0, 0.0, 2.0]).unwrap();
    /// assert_eq!(report.positive, 2);
    /// assert!((report.score - 0.5).abs() < 1e-12);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::EmptyInput`] if `directional_derivatives` is empty.
    pub fn from_derivatives(directional_derivatives: Vec<f64>) -> Result<Self> {
        let total = directional_derivatives.len();
        if total == 0 {
            return Err(TcavError::EmptyInput);
        }
        let positive = directional_derivatives.iter().filter(|&&d| d > 0.0).count();

        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let score = positive as f64 / total as f64;

        Ok(Self {
            score,
            positive,
            total,
            directional_derivatives,
        })
    }
}

// ---------------------------------------------------------------------------
// Tcav
// ---------------------------------------------------------------------------

/// Concept sensitivity scorer bound to one model layer.
///
/// The layer is resolved once at construction. Each scoring call walks the
/// inputs in contiguous batches, computes the directional derivative of
/// each batch in order, and aggregates the ordered results. The engine
/// owns its [`ActivationRecorder`]: concurrent calls on the same engine are
/// rejected with [`TcavError::AlreadyWatching`], so run parallel scoring on
/// separate engines.
///
/// # Example
///
/// ```
/// use candle_core::{Device, Tensor};
/// use candle_nn::Linear;
/// use candle_tcav::{Activation, ConceptModel, SequentialClassifier, Stage, Tcav};
///
/// let dev = Device::Cpu;
/// let w = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], &dev).unwrap();
/// let classifier = SequentialClassifier::new(vec![
///     Stage::dense("hidden", Linear::new(w.clone(), None)),
///     Stage::activation("relu", Activation::Relu),
///     Stage::dense("logits", Linear::new(w, None)),
/// ])
/// .unwrap();
/// let model = ConceptModel::new(Box::new(classifier), dev.clone());
///
/// let tcav = Tcav::new(&model, "hidden", Some(2)).unwrap();
/// let inputs = Tensor::new(&[[1f32, 0.5], [-1.0, 0.5], [2.0, -3.0]], &dev).unwrap();
/// let cav = Tensor::new(&[1f32, 0.0], &dev).unwrap();
///
/// // Only samples whose first hidden unit is active respond to the concept.
/// let score = tcav.score(&inputs, 0, &cav).unwrap();
/// assert!((score - 2.0 / 3.0).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct Tcav<'m> {
    /// Model under test (never mutated).
    model: &'m ConceptModel,
    /// Target layer, resolved at construction.
    layer: Layer,
    /// Maximum samples per forward/backward pass; `None` = all at once.
    batch_size: Option<usize>,
    /// Instrumentation state of this engine.
    recorder: ActivationRecorder,
}

impl<'m> Tcav<'m> {
    /// Bind an engine to `layer` of `model`.
    ///
    /// `batch_size` of `None` evaluates the whole input collection in one pass.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::LayerNotFound`] if `layer` matches no layer, or
    /// [`TcavError::Config`] if `batch_size` is `Some(0)`.
    pub fn new<L: Into<LayerId>>(
        model: &'m ConceptModel,
        layer: L,
        batch_size: Option<usize>,
    ) -> Result<Self> {
        if batch_size == Some(0) {
            return Err(TcavError::Config("batch_size must be at least 1".into()));
        }
        let layer = resolve_layer(model, &layer.into())?;
        tracing::info!(layer = %layer, ?batch_size, "tcav engine ready");

        Ok(Self {
            model,
            layer,
            batch_size,
            recorder: ActivationRecorder::new(),
        })
    }

    /// Bind an engine using a [`TcavConfig`].
    ///
    /// # Errors
    ///
    /// Same as [`Tcav::new`].
    pub fn from_config(model: &'m ConceptModel, config: &TcavConfig) -> Result<Self> {
        // BORROW: explicit .clone() -- LayerId is consumed by resolution
        Self::new(model, config.layer.clone(), config.batch_size)
    }

    /// The resolved target layer.
    #[must_use]
    pub const fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Configured batch size (`None` = whole collection).
    #[must_use]
    pub const fn batch_size(&self) -> Option<usize> {
        self.batch_size
    }

    /// This engine's recorder, e.g. to check that no recording is left active.
    #[must_use]
    pub const fn recorder(&self) -> &ActivationRecorder {
        &self.recorder
    }

    /// TCAV score of `cav` for class `label` over `inputs`.
    ///
    /// # Shapes
    /// - `inputs`: `[n, ...]` with `n >= 1`
    /// - `cav`: the target layer's per-sample activation shape
    /// - returns: a value in `[0, 1]`
    ///
    /// # Errors
    ///
    /// See [`report`](Self::report).
    pub fn score(&self, inputs: &Tensor, label: usize, cav: &Tensor) -> Result<f64> {
        Ok(self.report(inputs, label, cav)?.score)
    }

    /// Score plus the per-sample directional derivatives behind it.
    ///
    /// # Errors
    ///
    /// - [`TcavError::EmptyInput`] if `inputs` has no samples.
    /// - [`TcavError::ShapeMismatch`] / [`TcavError::InvalidLabel`] from the
    ///   first batch that detects them.
    /// - [`TcavError::AlreadyWatching`] if this engine is already scoring.
    /// - [`TcavError::Model`] from the model's forward or backward pass.
    pub fn report(&self, inputs: &Tensor, label: usize, cav: &Tensor) -> Result<TcavReport> {
        let derivatives = self.directional_derivatives(inputs, label, cav)?;
        let report = TcavReport::from_derivatives(derivatives)?;
        tracing::debug!(
            layer = %self.layer,
            label,
            positive = report.positive,
            total = report.total,
            score = report.score,
            "tcav score",
        );
        Ok(report)
    }

    /// Per-sample directional derivatives over all inputs, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::EmptyInput`] if `inputs` has no samples, and
    /// otherwise the errors of [`directional_derivative`].
    pub fn directional_derivatives(
        &self,
        inputs: &Tensor,
        label: usize,
        cav: &Tensor,
    ) -> Result<Vec<f64>> {
        let total = inputs.dim(0)?;
        if total == 0 {
            return Err(TcavError::EmptyInput);
        }
        let batches = batch_tensor(inputs, self.batch_size.unwrap_or(total))?;
        let num_batches = batches.len();

        let mut derivatives = Vec::with_capacity(total);
        for (i, batch) in batches.iter().enumerate() {
            let len = batch.dim(0)?;
            tracing::debug!(batch = i, num_batches, len, total, "scoring batch");
            derivatives.extend(self.evaluate_batch(batch, label, cav)?);
        }
        Ok(derivatives)
    }

    /// Directional derivatives for a single batch, evaluated in one pass.
    ///
    /// # Errors
    ///
    /// See [`directional_derivative`].
    pub fn evaluate_batch(&self, batch: &Tensor, label: usize, cav: &Tensor) -> Result<Vec<f64>> {
        directional_derivative(self.model, &self.recorder, &self.layer, batch, label, cav)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::Linear;

    use super::*;
    use crate::classifier::{SequentialClassifier, Stage};
    use crate::config::Activation;

    fn model() -> ConceptModel {
        let dev = Device::Cpu;
        let identity = Tensor::new(&[[1f32, 0.0], [0.0, 1.0]], &dev).unwrap();
        let head = Tensor::new(&[[1f32, -2.0], [0.5, 0.5]], &dev).unwrap();
        let classifier = SequentialClassifier::new(vec![
            Stage::dense("hidden", Linear::new(identity, None)),
            Stage::activation("relu", Activation::Relu),
            Stage::dense("logits", Linear::new(head, None)),
        ])
        .unwrap();
        ConceptModel::new(Box::new(classifier), dev)
    }

    #[test]
    fn report_counts_zero_and_nan_as_not_positive() {
        let report =
            TcavReport::from_derivatives(vec![1.0, 0.0, -0.0, f64::NAN, f64::INFINITY]).unwrap();
        assert_eq!(report.positive, 2);
        assert_eq!(report.total, 5);
        assert!((report.score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn report_rejects_empty() {
        assert!(matches!(
            TcavReport::from_derivatives(Vec::new()),
            Err(TcavError::EmptyInput)
        ));
    }

    #[test]
    fn construction_validates_layer_and_batch_size() {
        let model = model();
        assert!(matches!(
            Tcav::new(&model, "nonexistent_layer", Some(4)),
            Err(TcavError::LayerNotFound(_))
        ));
        assert!(matches!(
            Tcav::new(&model, "relu", Some(0)),
            Err(TcavError::Config(_))
        ));
        let tcav = Tcav::new(&model, 1, None).unwrap();
        assert_eq!(tcav.layer().name(), "relu");
        assert_eq!(tcav.batch_size(), None);
    }

    #[test]
    fn from_config_uses_default_batch_size() {
        let model = model();
        let tcav = Tcav::from_config(&model, &TcavConfig::new("hidden")).unwrap();
        assert_eq!(tcav.batch_size(), Some(DEFAULT_BATCH_SIZE));
        assert_eq!(tcav.layer().index(), 0);
    }

    #[test]
    fn hidden_layer_derivatives_follow_relu_gates() {
        let model = model();
        let tcav = Tcav::new(&model, "hidden", Some(3)).unwrap();
        let inputs = Tensor::new(
            &[[1f32, -1.0], [-1.0, 1.0], [1.0, 1.0], [-1.0, -1.0]],
            &Device::Cpu,
        )
        .unwrap();
        let cav = Tensor::new(&[1f32, 1.0], &Device::Cpu).unwrap();

        let report = tcav.report(&inputs, 0, &cav).unwrap();
        assert_eq!(report.directional_derivatives, vec![1.0, -2.0, -1.0, 0.0]);
        assert_eq!(report.positive, 1);
        assert!((report.score - 0.25).abs() < 1e-12);
        assert_eq!(tcav.recorder().num_active(), 0);
    }

    #[test]
    fn empty_inputs_are_rejected() {
        let model = model();
        let tcav = Tcav::new(&model, "hidden", None).unwrap();
        let inputs = Tensor::zeros((0, 2), DType::F32, &Device::Cpu).unwrap();
        let cav = Tensor::new(&[1f32, 1.0], &Device::Cpu).unwrap();
        assert!(matches!(
            tcav.score(&inputs, 0, &cav),
            Err(TcavError::EmptyInput)
        ));
    }

    #[test]
    fn engine_busy_while_recording() {
        let model = model();
        let tcav = Tcav::new(&model, "hidden", None).unwrap();
        let inputs = Tensor::new(&[[1f32, 1.0]], &Device::Cpu).unwrap();
        let cav = Tensor::new(&[1f32, 1.0], &Device::Cpu).unwrap();

        let held = tcav.recorder().begin(tcav.layer()).unwrap();
        assert!(matches!(
            tcav.score(&inputs, 0, &cav),
            Err(TcavError::AlreadyWatching(_))
        ));
        held.end();
        assert!(tcav.score(&inputs, 0, &cav).is_ok());
    }
}
