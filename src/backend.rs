// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core backend trait and model wrapper.
//!
//! [`ConceptBackend`] is the trait every differentiable classifier
//! implements to be scored. [`ConceptModel`] wraps a backend with device
//! metadata and convenience methods.

use std::path::Path;

use candle_core::{DType, Device, Tensor};

use crate::classifier::SequentialClassifier;
use crate::config::ClassifierConfig;
use crate::error::{Result, TcavError};
use crate::hooks::{HookCache, HookSpec};
use crate::tcav::Layer;

// ---------------------------------------------------------------------------
// ConceptBackend trait
// ---------------------------------------------------------------------------

/// Unified interface for classifiers with hook-aware forward passes.
///
/// A backend exposes its ordered layer sequence by name and a single
/// [`forward`](Self::forward) that honours a [`HookSpec`]. Backends never
/// hold instrumentation state themselves: which layer is watched travels
/// with each call, so a backend can be shared read-only.
pub trait ConceptBackend: Send + Sync {
    /// Names of the model's layers, in evaluation order.
    ///
    /// Index `i` of the returned vector is the layer index used in
    /// [`HookSpec`] and [`HookCache`].
    fn layer_names(&self) -> Vec<String>;

    /// Forward pass with optional capture and gradient tracking.
    ///
    /// After computing each layer's output the backend must route it
    /// through [`HookSpec::observe`] and continue with the returned tensor.
    /// With an empty spec this is a plain forward pass.
    ///
    /// # Shapes
    /// - `inputs`: `[batch, ...]`
    /// - returns: [`HookCache`] whose output is `[batch, num_classes]`
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Model`] on tensor operation failures.
    fn forward(&self, inputs: &Tensor, hooks: &HookSpec) -> Result<HookCache>;
}

// ---------------------------------------------------------------------------
// ConceptModel
// ---------------------------------------------------------------------------

/// High-level model wrapper combining a backend with device metadata.
pub struct ConceptModel {
    /// The underlying model backend.
    // TRAIT_OBJECT: heterogeneous model backends require dynamic dispatch
    backend: Box<dyn ConceptBackend>,
    /// The device this model lives on.
    device: Device,
}

impl std::fmt::Debug for ConceptModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConceptModel")
            .field("layers", &self.backend.layer_names())
            .field("device", &self.device)
            .finish()
    }
}

impl ConceptModel {
    /// Wrap an existing backend.
    // TRAIT_OBJECT: heterogeneous model backends require dynamic dispatch
    #[must_use]
    pub fn new(backend: Box<dyn ConceptBackend>, device: Device) -> Self {
        Self { backend, device }
    }

    /// Load a [`SequentialClassifier`] from a JSON config and safetensors weights.
    ///
    /// Weights are loaded in `F32`. With the `mmap` feature the safetensors
    /// file is memory-mapped instead of read into RAM.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Config`] if the config cannot be read or parsed,
    /// or [`TcavError::Model`] if weight loading fails.
    pub fn load_classifier(config_path: &Path, weights_path: &Path, device: Device) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path).map_err(|e| {
            TcavError::Config(format!("read {}: {e}", config_path.display()))
        })?;
        let json: serde_json::Value = serde_json::from_str(&config_str)
            .map_err(|e| TcavError::Config(format!("parse {}: {e}", config_path.display())))?;
        let config = ClassifierConfig::from_json(&json)?;

        let vb = create_var_builder(weights_path, DType::F32, &device)?;
        let classifier = SequentialClassifier::load(&config, vb)?;
        tracing::info!(
            layers = classifier.num_stages(),
            classes = config.num_classes,
            weights = %weights_path.display(),
            "loaded sequential classifier",
        );

        Ok(Self::new(Box::new(classifier), device))
    }

    /// The device this model lives on.
    #[must_use]
    pub const fn device(&self) -> &Device {
        &self.device
    }

    /// Names of the model's layers, in evaluation order.
    #[must_use]
    pub fn layer_names(&self) -> Vec<String> {
        self.backend.layer_names()
    }

    /// Number of layers.
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.backend.layer_names().len()
    }

    /// Run a forward pass with the given hook specification.
    ///
    /// # Errors
    ///
    /// Propagates errors from the underlying backend.
    pub fn forward(&self, inputs: &Tensor, hooks: &HookSpec) -> Result<HookCache> {
        self.backend.forward(inputs, hooks)
    }

    /// Run a plain forward pass and return the `[batch, num_classes]` scores.
    ///
    /// # Errors
    ///
    /// Propagates errors from the underlying backend.
    pub fn predict(&self, inputs: &Tensor) -> Result<Tensor> {
        Ok(self.backend.forward(inputs, &HookSpec::new())?.into_output())
    }

    /// Capture the output of `layer` for `inputs`, without gradient tracking.
    ///
    /// # Shapes
    /// - `inputs`: `[batch, ...]`
    /// - returns: `[batch, ...]` -- the layer's activation
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Hook`] if the backend did not capture the layer.
    pub fn activations(&self, inputs: &Tensor, layer: &Layer) -> Result<Tensor> {
        let mut hooks = HookSpec::new();
        hooks.capture(layer.index());
        let cache = self.backend.forward(inputs, &hooks)?;
        // BORROW: explicit .clone() -- Tensor is Arc-backed
        Ok(cache.require(layer.index())?.clone())
    }

    /// Access the underlying backend.
    // TRAIT_OBJECT: caller needs dynamic dispatch for backend-specific methods
    #[must_use]
    pub fn backend(&self) -> &dyn ConceptBackend {
        &*self.backend
    }
}

// ---------------------------------------------------------------------------
// Weight loading helpers (used by load_classifier)
// ---------------------------------------------------------------------------

/// Create a `VarBuilder` from a safetensors file.
fn create_var_builder(
    path: &Path,
    dtype: DType,
    device: &Device,
) -> Result<candle_nn::VarBuilder<'static>> {
    #[cfg(feature = "mmap")]
    {
        mmap_var_builder(path, dtype, device)
    }
    #[cfg(not(feature = "mmap"))]
    {
        buffered_var_builder(path, dtype, device)
    }
}

/// Load weights via buffered (safe) reading -- reads all data into RAM.
#[cfg(not(feature = "mmap"))]
fn buffered_var_builder(
    path: &Path,
    dtype: DType,
    device: &Device,
) -> Result<candle_nn::VarBuilder<'static>> {
    let data = std::fs::read(path).map_err(|e| {
        TcavError::Model(candle_core::Error::Msg(format!(
            "read {}: {e}",
            path.display()
        )))
    })?;
    let vb = candle_nn::VarBuilder::from_buffered_safetensors(data, dtype, device)?;
    Ok(vb)
}

/// Load weights via a memory-mapped file.
///
/// # Safety
///
/// The safetensors file must not be modified while the model is loaded.
/// This is the standard invariant for memory-mapped files.
#[cfg(feature = "mmap")]
#[allow(unsafe_code)]
fn mmap_var_builder(
    path: &Path,
    dtype: DType,
    device: &Device,
) -> Result<candle_nn::VarBuilder<'static>> {
    // SAFETY: safetensors files must not be modified while loaded.
    let vb = unsafe { candle_nn::VarBuilder::from_mmaped_safetensors(&[path], dtype, device)? };
    Ok(vb)
}
