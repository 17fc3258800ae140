// SPDX-License-Identifier: MIT OR Apache-2.0

//! Classifier and scoring configuration parsed from JSON.
//!
//! [`ClassifierConfig`] describes a [`SequentialClassifier`](crate::SequentialClassifier)
//! (dense stack with a shared activation). [`TcavConfig`] describes which
//! layer an engine instruments and how it batches inputs.
//!
//! # Usage
//!
//! ```
//! use candle_tcav::{ClassifierConfig, LayerId, TcavConfig};
//!
//! let json = serde_json::json!({"input_size": 8, "hidden_sizes": [16, 4],
//!     "num_classes": 3, "activation": "gelu"});
//! let config = ClassifierConfig::from_json(&json).unwrap();
//! assert_eq!(config.stage_names().len(), 5);
//!
//! let tcav = TcavConfig::from_json(&serde_json::json!({"layer": "dense_1"})).unwrap();
//! assert_eq!(tcav.layer, LayerId::Name("dense_1".into()));
//! assert_eq!(tcav.batch_size, Some(64));
//! ```

use std::fmt;

use serde_json::Value;

use crate::error::{Result, TcavError};
use crate::hooks::LayerId;
use crate::tcav::DEFAULT_BATCH_SIZE;

// ---------------------------------------------------------------------------
// Configuration enums
// ---------------------------------------------------------------------------

/// Activation function applied between dense layers.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Rectified linear unit.
    Relu,
    /// Gaussian Error Linear Unit -- exact (erf) variant.
    Gelu,
    /// Gaussian Error Linear Unit -- tanh approximation.
    GeluApprox,
    /// Sigmoid Linear Unit.
    Silu,
    /// Hyperbolic tangent.
    Tanh,
}

impl Activation {
    /// Parse a config string (`"relu"`, `"gelu"`, `"gelu_pytorch_tanh"`,
    /// `"silu"`/`"swish"`, `"tanh"`).
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Config`] for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "relu" => Ok(Self::Relu),
            "gelu" => Ok(Self::Gelu),
            "gelu_new" | "gelu_pytorch_tanh" => Ok(Self::GeluApprox),
            "silu" | "swish" => Ok(Self::Silu),
            "tanh" => Ok(Self::Tanh),
            other => Err(TcavError::Config(format!(
                "unsupported activation: '{other}'"
            ))),
        }
    }

    /// Short lowercase name, used to build stage names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Gelu => "gelu",
            Self::GeluApprox => "gelu_tanh",
            Self::Silu => "silu",
            Self::Tanh => "tanh",
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relu => write!(f, "ReLU"),
            Self::Gelu => write!(f, "GELU"),
            Self::GeluApprox => write!(f, "GELU (tanh approx)"),
            Self::Silu => write!(f, "SiLU"),
            Self::Tanh => write!(f, "Tanh"),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassifierConfig
// ---------------------------------------------------------------------------

/// Configuration for a dense sequential classifier.
///
/// The stage sequence is `dense_0, {act}_0, dense_1, {act}_1, ..., logits`:
/// one dense layer plus activation per hidden size, then a final dense
/// projection to `num_classes` scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    /// Number of input features per sample.
    pub input_size: usize,
    /// Width of each hidden dense layer.
    pub hidden_sizes: Vec<usize>,
    /// Number of output classes.
    pub num_classes: usize,
    /// Activation applied after every hidden dense layer.
    pub activation: Activation,
    /// Whether dense layers carry a bias term.
    pub bias: bool,
}

impl ClassifierConfig {
    /// Parse a [`ClassifierConfig`] from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Config`] if a required field is absent, a size is
    /// zero, or the activation is unknown.
    pub fn from_json(config: &Value) -> Result<Self> {
        let input_size = get_usize(config, "input_size")?;
        let num_classes = get_usize(config, "num_classes")?;
        let hidden_sizes = match config.get("hidden_sizes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            TcavError::Config(format!("invalid hidden size: {v}"))
                        })
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(TcavError::Config(format!(
                    "field 'hidden_sizes' must be an array, got {other}"
                )));
            }
        };
        let activation = match config.get("activation").and_then(Value::as_str) {
            Some(name) => Activation::parse(name)?,
            None => Activation::Relu,
        };

        let parsed = Self {
            input_size,
            hidden_sizes,
            num_classes,
            activation,
            bias: get_bool_or(config, "bias", true),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Reject zero-sized layers.
    fn validate(&self) -> Result<()> {
        if self.input_size == 0 || self.num_classes == 0 {
            return Err(TcavError::Config(
                "input_size and num_classes must be positive".into(),
            ));
        }
        if self.hidden_sizes.contains(&0) {
            return Err(TcavError::Config("hidden sizes must be positive".into()));
        }
        Ok(())
    }

    /// Stage names in evaluation order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(2 * self.hidden_sizes.len() + 1);
        for i in 0..self.hidden_sizes.len() {
            names.push(format!("dense_{i}"));
            names.push(format!("{}_{i}", self.activation.as_str()));
        }
        names.push("logits".to_owned());
        names
    }
}

// ---------------------------------------------------------------------------
// TcavConfig
// ---------------------------------------------------------------------------

/// Scoring configuration: target layer and batch size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcavConfig {
    /// Layer whose activation space the concept vectors live in.
    pub layer: LayerId,
    /// Maximum samples per forward/backward pass; `None` scores every input
    /// in one pass.
    pub batch_size: Option<usize>,
}

impl TcavConfig {
    /// Build a config with the default batch size.
    pub fn new<L: Into<LayerId>>(layer: L) -> Self {
        Self {
            layer: layer.into(),
            batch_size: Some(DEFAULT_BATCH_SIZE),
        }
    }

    /// Parse a [`TcavConfig`] from a JSON value.
    ///
    /// `layer` is either a string (layer name) or a non-negative integer
    /// (layer index). `batch_size` defaults to [`DEFAULT_BATCH_SIZE`]; an
    /// explicit `null` means "whole input collection".
    ///
    /// # Errors
    ///
    /// Returns [`TcavError::Config`] if `layer` is missing or malformed, or
    /// if `batch_size` is not a positive integer.
    pub fn from_json(config: &Value) -> Result<Self> {
        let layer = match config.get("layer") {
            Some(Value::String(name)) => LayerId::Name(name.clone()),
            Some(Value::Number(n)) => n
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .map(LayerId::Index)
                .ok_or_else(|| TcavError::Config(format!("invalid layer index: {n}")))?,
            Some(other) => {
                return Err(TcavError::Config(format!(
                    "field 'layer' must be a name or an index, got {other}"
                )));
            }
            None => return Err(TcavError::Config("missing 'layer' field".into())),
        };

        let batch_size = match config.get("batch_size") {
            None => Some(DEFAULT_BATCH_SIZE),
            Some(Value::Null) => None,
            Some(_) => match get_usize(config, "batch_size")? {
                0 => return Err(TcavError::Config("batch_size must be at least 1".into())),
                n => Some(n),
            },
        };

        Ok(Self { layer, batch_size })
    }
}

// ---------------------------------------------------------------------------
// JSON extraction helpers
// ---------------------------------------------------------------------------

/// Extract a required `usize` field from a JSON object.
fn get_usize(config: &Value, key: &str) -> Result<usize> {
    let val = config
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| TcavError::Config(format!("missing or invalid field '{key}'")))?;
    usize::try_from(val)
        .map_err(|_| TcavError::Config(format!("field '{key}' value {val} overflows usize")))
}

/// Extract a `bool` field, returning a default if absent.
fn get_bool_or(config: &Value, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn mlp_config_json() -> Value {
        serde_json::json!({
            "input_size": 4,
            "hidden_sizes": [8, 6],
            "num_classes": 3,
            "activation": "relu"
        })
    }

    #[test]
    fn parse_classifier_basic() {
        let config = ClassifierConfig::from_json(&mlp_config_json()).unwrap();
        assert_eq!(config.input_size, 4);
        assert_eq!(config.hidden_sizes, vec![8, 6]);
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.activation, Activation::Relu);
        assert!(config.bias);
        assert_eq!(
            config.stage_names(),
            vec!["dense_0", "relu_0", "dense_1", "relu_1", "logits"]
        );
    }

    #[test]
    fn classifier_defaults() {
        let json = serde_json::json!({"input_size": 2, "num_classes": 2});
        let config = ClassifierConfig::from_json(&json).unwrap();
        assert!(config.hidden_sizes.is_empty());
        assert_eq!(config.activation, Activation::Relu);
        assert_eq!(config.stage_names(), vec!["logits"]);
    }

    #[test]
    fn classifier_rejects_bad_fields() {
        let missing = serde_json::json!({"input_size": 2});
        assert!(ClassifierConfig::from_json(&missing).is_err());

        let zero = serde_json::json!({"input_size": 2, "num_classes": 2, "hidden_sizes": [0]});
        assert!(ClassifierConfig::from_json(&zero).is_err());

        let act = serde_json::json!({"input_size": 2, "num_classes": 2, "activation": "softplus"});
        assert!(matches!(
            ClassifierConfig::from_json(&act),
            Err(TcavError::Config(_))
        ));
    }

    #[test]
    fn activation_aliases() {
        assert_eq!(Activation::parse("swish").unwrap(), Activation::Silu);
        assert_eq!(
            Activation::parse("gelu_pytorch_tanh").unwrap(),
            Activation::GeluApprox
        );
        assert_eq!(Activation::GeluApprox.as_str(), "gelu_tanh");
    }

    #[test]
    fn tcav_config_layer_by_name_or_index() {
        let by_name = TcavConfig::from_json(&serde_json::json!({"layer": "relu_0"})).unwrap();
        assert_eq!(by_name.layer, LayerId::Name("relu_0".into()));
        assert_eq!(by_name.batch_size, Some(DEFAULT_BATCH_SIZE));

        let by_index =
            TcavConfig::from_json(&serde_json::json!({"layer": 2, "batch_size": 16})).unwrap();
        assert_eq!(by_index.layer, LayerId::Index(2));
        assert_eq!(by_index.batch_size, Some(16));
    }

    #[test]
    fn tcav_config_null_batch_size_means_full_collection() {
        let config =
            TcavConfig::from_json(&serde_json::json!({"layer": "x", "batch_size": null})).unwrap();
        assert_eq!(config.batch_size, None);
    }

    #[test]
    fn tcav_config_rejects_invalid() {
        assert!(TcavConfig::from_json(&serde_json::json!({})).is_err());
        assert!(TcavConfig::from_json(&serde_json::json!({"layer": -1})).is_err());
        assert!(TcavConfig::from_json(&serde_json::json!({"layer": true})).is_err());
        assert!(
            TcavConfig::from_json(&serde_json::json!({"layer": "x", "batch_size": 0})).is_err()
        );
    }
}
