// SPDX-License-Identifier: MIT OR Apache-2.0

//! # candle-tcav
//!
//! Testing with Concept Activation Vectors (TCAV) for classifiers built on
//! [candle](https://github.com/huggingface/candle).
//!
//! Given a differentiable classifier, one of its layers, and a concept
//! activation vector (CAV) living in that layer's activation space,
//! candle-tcav measures how often moving the layer's activation along the
//! concept direction increases the score of a target class.
//!
//! ```
//! use candle_core::{Device, Tensor};
//! use candle_nn::Linear;
//! use candle_tcav::{ConceptModel, SequentialClassifier, Stage, Tcav};
//!
//! let dev = Device::Cpu;
//! let w = Tensor::new(&[[2f32, 0.0], [0.0, -1.0]], &dev).unwrap();
//! let classifier = SequentialClassifier::new(vec![
//!     Stage::dense("hidden", Linear::new(w.clone(), None)),
//!     Stage::dense("logits", Linear::new(w, None)),
//! ])
//! .unwrap();
//! let model = ConceptModel::new(Box::new(classifier), dev.clone());
//!
//! let tcav = Tcav::new(&model, "hidden", Some(64)).unwrap();
//! let inputs = Tensor::new(&[[1f32, 1.0], [0.0, 3.0]], &dev).unwrap();
//! let cav = Tensor::new(&[1f32, 0.0], &dev).unwrap();
//! assert_eq!(tcav.score(&inputs, 0, &cav).unwrap(), 1.0);
//! ```
//!
//! ## Backends
//!
//! Any model implementing [`ConceptBackend`] can be scored. The bundled
//! [`SequentialClassifier`] covers dense feed-forward classifiers and can be
//! loaded from a JSON config plus safetensors weights via
//! [`ConceptModel::load_classifier`].

#![warn(missing_docs)]

pub mod backend;
pub mod classifier;
pub mod config;
pub mod error;
pub mod hooks;
pub mod tcav;
pub mod util;

pub use backend::{ConceptBackend, ConceptModel};
pub use classifier::{SequentialClassifier, Stage, StageKind};
pub use config::{Activation, ClassifierConfig, TcavConfig};
pub use error::{Result, TcavError};
pub use hooks::{HookCache, HookSpec, LayerId};
pub use tcav::{
    ActivationRecorder, DEFAULT_BATCH_SIZE, Layer, Recording, Tcav, TcavReport,
    directional_derivative, project_onto_cav, resolve_layer, select_class,
};
