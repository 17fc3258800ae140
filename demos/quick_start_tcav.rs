// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quick start: build a small classifier, then score a concept direction
//! against each class.
//!
//! ```bash
//! RUST_LOG=debug cargo run --example quick_start_tcav
//! ```
//!
//! The classifier is randomly initialised, so the scores only illustrate
//! the API. Point [`ConceptModel::load_classifier`] at a trained
//! `config.json` + `model.safetensors` pair for real experiments.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_tcav::{ClassifierConfig, ConceptModel, SequentialClassifier, Tcav, TcavConfig};

fn main() -> candle_tcav::Result<()> {
    // 1. Initialise tracing so per-batch events are visible.
    tracing_subscriber::fmt::init();

    // 2. Build a 16 -> 32 -> 32 -> 4 classifier.
    let device = Device::Cpu;
    let config = ClassifierConfig::from_json(&serde_json::json!({
        "input_size": 16,
        "hidden_sizes": [32, 32],
        "num_classes": 4,
        "activation": "gelu"
    }))?;
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let classifier = SequentialClassifier::load(&config, vb)?;
    let model = ConceptModel::new(Box::new(classifier), device.clone());
    println!("Layers: {:?}", model.layer_names());

    // 3. Bind the engine to the second hidden layer.
    let tcav_config = TcavConfig::from_json(&serde_json::json!({
        "layer": "gelu_1",
        "batch_size": 16
    }))?;
    let tcav = Tcav::from_config(&model, &tcav_config)?;

    // 4. A concept direction in that layer's 32-dim activation space.
    let inputs = Tensor::randn(0f32, 1.0, (100, 16), &device)?;
    let cav = Tensor::randn(0f32, 1.0, 32, &device)?;

    // 5. Score the concept for each class.
    for label in 0..config.num_classes {
        let report = tcav.report(&inputs, label, &cav)?;
        println!(
            "class {label}: TCAV = {:.2}  ({}/{} positive)",
            report.score, report.positive, report.total
        );
    }

    Ok(())
}
