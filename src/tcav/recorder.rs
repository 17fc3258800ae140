// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exclusive, scoped instrumentation of a layer.
//!
//! [`ActivationRecorder::begin`] marks a layer as watched and returns a
//! [`Recording`] guard carrying the [`HookSpec`] for the next forward pass.
//! The watch is released by [`Recording::end`] or, on any other exit path
//! (`?` propagation, panic unwinding), when the guard is dropped.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::{Result, TcavError};
use crate::hooks::HookSpec;
use crate::tcav::Layer;

/// Tracks which layers are currently watched.
///
/// One recorder belongs to one engine. Only one recording per layer may be
/// active at a time.
#[derive(Debug, Default)]
pub struct ActivationRecorder {
    /// Indices of layers with an active recording.
    watching: Mutex<HashSet<usize>>,
}

impl ActivationRecorder {
    /// Create a recorder with no active recordings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `layer` for the next forward pass.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::AlreadyWatching`] if `layer` already has an
    /// active recording.
    pub fn begin(&self, layer: &Layer) -> Result<Recording<'_>> {
        if !self.lock().insert(layer.index()) {
            return Err(TcavError::AlreadyWatching(layer.name().to_owned()));
        }
        tracing::trace!(layer = %layer, "begin recording");

        let mut hooks = HookSpec::new();
        hooks.watch(layer.index());
        Ok(Recording {
            recorder: self,
            // BORROW: explicit .clone() -- the guard must not borrow the caller's layer
            layer: layer.clone(),
            hooks,
            active: true,
        })
    }

    /// Whether `layer` currently has an active recording.
    #[must_use]
    pub fn is_watching(&self, layer: &Layer) -> bool {
        self.lock().contains(&layer.index())
    }

    /// Number of layers with an active recording.
    #[must_use]
    pub fn num_active(&self) -> usize {
        self.lock().len()
    }

    /// Drop the watch on layer `index`.
    fn release(&self, index: usize) {
        self.lock().remove(&index);
    }

    /// Lock the watch set, recovering it if a panicking thread poisoned it.
    fn lock(&self) -> MutexGuard<'_, HashSet<usize>> {
        self.watching.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An active recording on one layer; releases it when ended or dropped.
#[derive(Debug)]
#[must_use = "dropping a Recording immediately releases the layer"]
pub struct Recording<'r> {
    /// Recorder holding the watch.
    recorder: &'r ActivationRecorder,
    /// Watched layer.
    layer: Layer,
    /// Hooks to pass to the forward pass.
    hooks: HookSpec,
    /// `false` once released.
    active: bool,
}

impl Recording<'_> {
    /// Hooks that watch the recorded layer.
    #[must_use]
    pub const fn hooks(&self) -> &HookSpec {
        &self.hooks
    }

    /// The recorded layer.
    #[must_use]
    pub const fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Release the layer.
    pub fn end(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.active {
            self.active = false;
            self.recorder.release(self.layer.index());
            tracing::trace!(layer = %self.layer, "end recording");
        }
    }
}

impl Drop for Recording<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
