// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layer lookup by name or position.

use std::fmt;

use crate::backend::ConceptModel;
use crate::error::{Result, TcavError};
use crate::hooks::LayerId;

/// A resolved layer: its position in the model's layer sequence and its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layer {
    /// Position in [`ConceptModel::layer_names`].
    index: usize,
    /// Layer name.
    name: String,
}

impl Layer {
    /// Position of the layer in the model's layer sequence.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Name of the layer.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.index)
    }
}

/// Find the layer `id` refers to in `model`.
///
/// Names match the first layer with exactly that name; indices select the
/// layer at that position.
///
/// # Errors
///
/// Returns [`TcavError::LayerNotFound`] for an unknown name or an index
/// past the last layer.
pub fn resolve_layer(model: &ConceptModel, id: &LayerId) -> Result<Layer> {
    let names = model.layer_names();
    let found = match id {
        LayerId::Name(wanted) => names
            .into_iter()
            .enumerate()
            .find(|(_, name)| name == wanted),
        LayerId::Index(i) => names.into_iter().nth(*i).map(|name| (*i, name)),
    };

    found
        .map(|(index, name)| Layer { index, name })
        .ok_or_else(|| match id {
            LayerId::Name(wanted) => TcavError::LayerNotFound(format!("no layer named '{wanted}'")),
            LayerId::Index(i) => TcavError::LayerNotFound(format!(
                "layer index {i} out of range ({} layers)",
                model.num_layers()
            )),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use candle_core::Device;

    use super::*;
    use crate::classifier::{SequentialClassifier, Stage};
    use crate::config::Activation;

    fn model() -> ConceptModel {
        let classifier = SequentialClassifier::new(vec![
            Stage::flatten("flatten"),
            Stage::activation("act", Activation::Tanh),
            Stage::activation("act_2", Activation::Relu),
        ])
        .unwrap();
        ConceptModel::new(Box::new(classifier), Device::Cpu)
    }

    #[test]
    fn resolves_by_name() {
        let layer = resolve_layer(&model(), &LayerId::from("act_2")).unwrap();
        assert_eq!(layer.index(), 2);
        assert_eq!(layer.name(), "act_2");
        assert_eq!(layer.to_string(), "act_2 (#2)");
    }

    #[test]
    fn resolves_by_index() {
        let layer = resolve_layer(&model(), &LayerId::Index(0)).unwrap();
        assert_eq!(layer.name(), "flatten");
    }

    #[test]
    fn unknown_name_or_index_fails() {
        let model = model();
        assert!(matches!(
            resolve_layer(&model, &LayerId::from("nonexistent_layer")),
            Err(TcavError::LayerNotFound(_))
        ));
        assert!(matches!(
            resolve_layer(&model, &LayerId::Index(3)),
            Err(TcavError::LayerNotFound(_))
        ));
    }
}
