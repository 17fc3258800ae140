// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hook system for activation capture and gradient tracking.
//!
//! Provides [`LayerId`] (how a caller names a layer), [`HookSpec`] (which
//! layer outputs to capture or watch during one forward pass), and
//! [`HookCache`] (the output scores plus whatever the hooks collected).
//!
//! A *captured* layer output is a plain clone of the tensor. A *watched*
//! layer output is replaced by an independent [`Var`] holding the same
//! values, so the rest of the forward pass is computed from that variable
//! and a later `backward()` yields the gradient with respect to it.

use std::collections::{HashMap, HashSet};
use std::fmt;

use candle_core::{Tensor, Var};

use crate::error::{Result, TcavError};

// ---------------------------------------------------------------------------
// LayerId
// ---------------------------------------------------------------------------

/// Identifies a layer inside a model's ordered layer sequence.
///
/// # Example
///
/// ```
/// use candle_tcav::LayerId;
///
/// assert_eq!(LayerId::from("dense_1"), LayerId::Name("dense_1".into()));
/// assert_eq!(LayerId::from(2), LayerId::Index(2));
/// assert_eq!(LayerId::Index(2).to_string(), "#2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LayerId {
    /// Layer name, matched exactly against the model's layer names.
    Name(String),
    /// Zero-based position in the model's layer sequence.
    Index(usize),
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(i) => write!(f, "#{i}"),
        }
    }
}

impl From<&str> for LayerId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for LayerId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for LayerId {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

// ---------------------------------------------------------------------------
// HookSpec
// ---------------------------------------------------------------------------

/// Declares which layer outputs to capture or watch during a forward pass.
///
/// Passed to [`ConceptBackend::forward`](crate::ConceptBackend::forward).
/// When empty, the forward pass must be a plain evaluation with no extra
/// clones.
///
/// # Example
///
/// ```
/// use candle_tcav::HookSpec;
///
/// let mut hooks = HookSpec::new();
/// hooks.capture(0).watch(2);
/// assert!(hooks.is_captured(0));
/// assert!(hooks.is_watched(2));
/// ```
#[derive(Debug, Clone, Default)]
pub struct HookSpec {
    /// Layer indices whose outputs are cloned into the cache.
    captures: HashSet<usize>,
    /// Layer indices whose outputs become differentiation leaves.
    watches: HashSet<usize>,
}

impl HookSpec {
    /// Create an empty hook specification.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a plain capture of the output of layer `index`.
    pub fn capture(&mut self, index: usize) -> &mut Self {
        self.captures.insert(index);
        self
    }

    /// Request that the output of layer `index` be tracked for gradients.
    pub fn watch(&mut self, index: usize) -> &mut Self {
        self.watches.insert(index);
        self
    }

    /// Whether the output of layer `index` should be captured.
    #[must_use]
    pub fn is_captured(&self, index: usize) -> bool {
        self.captures.contains(&index)
    }

    /// Whether the output of layer `index` should be watched.
    #[must_use]
    pub fn is_watched(&self, index: usize) -> bool {
        self.watches.contains(&index)
    }

    /// Whether this spec neither captures nor watches anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty() && self.watches.is_empty()
    }

    /// Apply the hooks registered for layer `index` to its output.
    ///
    /// Backends call this once per layer, right after computing the layer
    /// output, and continue the forward pass with the returned tensor.
    /// For a watched layer the returned tensor is the leaf variable, so
    /// the values are unchanged but gradients can be taken with respect
    /// to it.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Model`] if the variable cannot be created.
    pub fn observe(&self, index: usize, output: Tensor, cache: &mut HookCache) -> Result<Tensor> {
        if self.is_captured(index) {
            cache.store(index, output.clone());
        }
        if !self.is_watched(index) {
            return Ok(output);
        }
        let leaf = Var::from_tensor(&output.detach())?;
        let tracked = leaf.as_tensor().clone();
        cache.store_watched(index, leaf);
        Ok(tracked)
    }
}

// ---------------------------------------------------------------------------
// HookCache
// ---------------------------------------------------------------------------

/// Output scores of a forward pass plus the tensors its hooks collected.
///
/// Returned by [`ConceptBackend::forward`](crate::ConceptBackend::forward).
#[derive(Debug)]
pub struct HookCache {
    /// Output tensor of the forward pass, `[batch, classes]`.
    output: Tensor,
    /// Captured layer outputs keyed by layer index.
    captures: HashMap<usize, Tensor>,
    /// Watched layer outputs keyed by layer index.
    watched: HashMap<usize, Var>,
}

impl HookCache {
    /// Create a new cache with the given output tensor and nothing collected.
    #[must_use]
    pub fn new(output: Tensor) -> Self {
        Self {
            output,
            captures: HashMap::new(),
            watched: HashMap::new(),
        }
    }

    /// The output tensor from the forward pass.
    #[must_use]
    pub const fn output(&self) -> &Tensor {
        &self.output
    }

    /// Consume the cache and return the output tensor.
    #[must_use]
    pub fn into_output(self) -> Tensor {
        self.output
    }

    /// Replace the output tensor once the forward pass has finished.
    pub fn set_output(&mut self, output: Tensor) {
        self.output = output;
    }

    /// Retrieve a captured layer output.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Tensor> {
        self.captures.get(&index)
    }

    /// Retrieve a captured layer output, failing if it was not captured.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Hook`] if layer `index` was not captured.
    pub fn require(&self, index: usize) -> Result<&Tensor> {
        self.captures
            .get(&index)
            .ok_or_else(|| TcavError::Hook(format!("layer #{index} was not captured")))
    }

    /// Retrieve the leaf variable of a watched layer.
    #[must_use]
    pub fn watched(&self, index: usize) -> Option<&Var> {
        self.watched.get(&index)
    }

    /// Retrieve the leaf variable of a watched layer, failing if absent.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Hook`] if layer `index` was not watched during
    /// the forward pass (for example, a backend that never calls
    /// [`HookSpec::observe`] for it).
    pub fn require_watched(&self, index: usize) -> Result<&Var> {
        self.watched
            .get(&index)
            .ok_or_else(|| TcavError::Hook(format!("layer #{index} was not watched")))
    }

    /// Store a captured layer output. Called by backend implementations.
    pub fn store(&mut self, index: usize, tensor: Tensor) {
        self.captures.insert(index, tensor);
    }

    /// Store the leaf variable of a watched layer.
    pub fn store_watched(&mut self, index: usize, leaf: Var) {
        self.watched.insert(index, leaf);
    }

    /// Number of captured tensors (excludes the output and watched layers).
    #[must_use]
    pub fn num_captures(&self) -> usize {
        self.captures.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn layer_id_conversions() {
        assert_eq!(LayerId::from("L1"), LayerId::Name("L1".to_string()));
        assert_eq!(LayerId::from("L1".to_string()), LayerId::Name("L1".to_string()));
        assert_eq!(LayerId::from(3), LayerId::Index(3));
        assert_eq!(LayerId::Name("L1".into()).to_string(), "L1");
        assert_eq!(LayerId::Index(3).to_string(), "#3");
    }

    #[test]
    fn empty_spec_passes_output_through() {
        let hooks = HookSpec::new();
        assert!(hooks.is_empty());

        let t = Tensor::new(&[1f32, 2.0, 3.0], &Device::Cpu).unwrap();
        let mut cache = HookCache::new(Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap());
        let out = hooks.observe(0, t.clone(), &mut cache).unwrap();

        assert_eq!(out.to_vec1::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(cache.num_captures(), 0);
        assert!(cache.watched(0).is_none());
    }

    #[test]
    fn capture_stores_a_copy() {
        let mut hooks = HookSpec::new();
        hooks.capture(1);

        let t = Tensor::new(&[[1f32, -1.0]], &Device::Cpu).unwrap();
        let mut cache = HookCache::new(Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap());
        hooks.observe(0, t.clone(), &mut cache).unwrap();
        hooks.observe(1, t, &mut cache).unwrap();

        assert!(cache.get(0).is_none());
        assert_eq!(cache.require(1).unwrap().dims(), &[1, 2]);
        assert!(cache.require(0).is_err());
    }

    #[test]
    fn watch_replaces_output_with_leaf_variable() {
        let mut hooks = HookSpec::new();
        hooks.watch(0);

        let t = Tensor::new(&[[2f32, 3.0]], &Device::Cpu).unwrap();
        let mut cache = HookCache::new(Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap());
        let tracked = hooks.observe(0, t, &mut cache).unwrap();

        // Same values, now differentiable.
        assert_eq!(tracked.to_vec2::<f32>().unwrap(), vec![vec![2.0, 3.0]]);
        let leaf = cache.require_watched(0).unwrap();
        let grads = tracked.sqr().unwrap().sum_all().unwrap().backward().unwrap();
        let grad = grads.get(leaf.as_tensor()).unwrap();
        assert_eq!(grad.to_vec2::<f32>().unwrap(), vec![vec![4.0, 6.0]]);
    }

    #[test]
    fn require_watched_errors_when_absent() {
        let cache = HookCache::new(Tensor::zeros(1, DType::F32, &Device::Cpu).unwrap());
        assert!(matches!(cache.require_watched(4), Err(TcavError::Hook(_))));
    }
}
