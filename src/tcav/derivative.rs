// SPDX-License-Identifier: MIT OR Apache-2.0

//! Directional derivative of a class score along a concept vector.
//!
//! For one batch: watch the target layer, run the forward pass, take the
//! gradient of the class score with respect to the watched activation, and
//! project it onto the concept activation vector (CAV). The result is one
//! value per sample: how fast the class score grows as the activation moves
//! along the concept direction.

use candle_core::{DType, Tensor};

use crate::backend::ConceptModel;
use crate::error::{Result, TcavError};
use crate::tcav::{ActivationRecorder, Layer, Recording};

/// Directional derivative of class `label` along `cav` for every sample of `batch`.
///
/// The recording on `layer` is released before this returns, whether the
/// evaluation succeeded or not. NaN or infinite gradients are passed
/// through unchanged. Only the recorded activation is a leaf of the
/// backward pass when the backend's weights are plain tensors, as they are
/// for [`SequentialClassifier::load`](crate::SequentialClassifier::load).
/// A backend whose weights are `Var`s gets the same values but also pays
/// for a gradient per parameter.
///
/// # Shapes
/// - `batch`: `[batch, ...]` -- model inputs
/// - `cav`: the layer's per-sample activation shape
/// - returns: `batch` values, in input order
///
/// # Errors
///
/// - [`TcavError::AlreadyWatching`] if `layer` is already recorded.
/// - [`TcavError::ShapeMismatch`] if `cav` does not match the activation.
/// - [`TcavError::InvalidLabel`] if `label` is not a class index.
/// - [`TcavError::Model`] / [`TcavError::Hook`] from the forward or backward pass.
pub fn directional_derivative(
    model: &ConceptModel,
    recorder: &ActivationRecorder,
    layer: &Layer,
    batch: &Tensor,
    label: usize,
    cav: &Tensor,
) -> Result<Vec<f64>> {
    let recording = recorder.begin(layer)?;
    let gradients = activation_gradient(model, &recording, batch, label, cav);
    recording.end();

    project_onto_cav(&gradients?, cav)
}

/// Gradient of the `label` score with respect to the recorded activation.
///
/// # Shapes
/// - returns: `[batch, ...]`, same shape and dtype as the activation
fn activation_gradient(
    model: &ConceptModel,
    recording: &Recording<'_>,
    batch: &Tensor,
    label: usize,
    cav: &Tensor,
) -> Result<Tensor> {
    let layer = recording.layer();
    let cache = model.forward(batch, recording.hooks())?;
    let activation = cache.require_watched(layer.index())?;

    let per_sample = activation.dims().get(1..).unwrap_or_default();
    if per_sample != cav.dims() {
        return Err(TcavError::ShapeMismatch {
            layer: layer.name().to_owned(),
            expected: per_sample.to_vec(),
            actual: cav.dims().to_vec(),
        });
    }

    let target = select_class(cache.output(), label)?;
    // Samples are independent, so the gradient of the summed scores holds
    // each sample's own gradient in its row.
    let grads = target.sum_all()?.backward()?;
    let gradient = match grads.get(activation.as_tensor()) {
        // BORROW: explicit .clone() -- Tensor is Arc-backed
        Some(g) => g.clone(),
        // The score does not depend on this layer.
        None => activation.zeros_like()?,
    };
    Ok(gradient)
}

/// Select the score column of class `label`.
///
/// # Shapes
/// - `scores`: `[batch, num_classes]`
/// - returns: `[batch]`
///
/// # Errors
///
/// Returns [`TcavError::InvalidLabel`] if `label >= num_classes`, or
/// [`TcavError::Model`] if `scores` is not two-dimensional.
pub fn select_class(scores: &Tensor, label: usize) -> Result<Tensor> {
    let (_, num_classes) = scores.dims2()?;
    if label >= num_classes {
        return Err(TcavError::InvalidLabel { label, num_classes });
    }
    Ok(scores.narrow(1, label, 1)?.squeeze(1)?)
}

/// Project per-sample gradients onto `cav`.
///
/// Multiplies each sample's gradient element-wise by `cav` and sums every
/// non-batch dimension. `F64` gradients are projected in `F64`, every
/// other dtype in `F32`.
///
/// # Shapes
/// - `gradients`: `[batch, ...]`
/// - `cav`: `[...]` (broadcast over the batch dimension)
/// - returns: `batch` values
///
/// # Errors
///
/// Returns [`TcavError::Model`] if the shapes cannot be broadcast.
pub fn project_onto_cav(gradients: &Tensor, cav: &Tensor) -> Result<Vec<f64>> {
    // PROMOTE: half precision is accumulated in f32; f64 is never narrowed
    let dtype = match gradients.dtype() {
        DType::F64 => DType::F64,
        _ => DType::F32,
    };
    let gradients = gradients.to_dtype(dtype)?;
    let cav = cav.to_dtype(dtype)?.to_device(gradients.device())?;
    let weighted = gradients.broadcast_mul(&cav)?;
    let per_sample = if weighted.rank() == 1 {
        weighted
    } else {
        weighted.flatten_from(1)?.sum(1)?
    };
    Ok(per_sample.to_dtype(DType::F64)?.to_vec1::<f64>()?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
