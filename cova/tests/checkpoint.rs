use anyhow::Result;
use bbox::{prelude::*, TLBR};
use cova::{
    checkpoint,
    dataset::{Batch, BoxRecord, PageSample},
    metrics::{EvalMetrics, Predictions},
    model::{CovaModel, CovaModelInit, ModelConfig},
    ElementClass,
};
use noisy_float::prelude::*;
use std::num::NonZeroUsize;
use tch::{Device, Kind, Tensor};
use tch_modules::{BackboneKind, NeighborOrder};

fn config(context_size: usize, roi_output_size: usize) -> ModelConfig {
    ModelConfig {
        backbone: BackboneKind::AlexNet,
        trainable_backbone: true,
        pretrained_weights: None,
        roi_output_size: NonZeroUsize::new(roi_output_size).unwrap(),
        context_size,
        context_proj_dim: NonZeroUsize::new(8).unwrap(),
        context_dim: NonZeroUsize::new(8).unwrap(),
        neighbor_order: NeighborOrder::Layout,
        use_pos_feat: true,
        use_additional_feat: false,
        hidden_dims: vec![16],
        dropout: r64(0.3),
    }
}

fn build(config: ModelConfig) -> Result<CovaModel> {
    CovaModelInit {
        config,
        extra_dim: 0,
        device: Device::Cpu,
    }
    .build()
}

fn validation_batch() -> Result<Batch> {
    use ElementClass::*;

    let pages = [
        vec![Background, Price, Title, Image, Background],
        vec![Title, Background, Price],
    ];
    let samples = pages
        .iter()
        .enumerate()
        .map(|(page, classes)| PageSample {
            id: format!("page-{}", page),
            image: Tensor::rand(&[3, 96, 96], (Kind::Float, Device::Cpu)),
            boxes: classes
                .iter()
                .enumerate()
                .map(|(nth, &class)| BoxRecord {
                    tlbr: TLBR::from_tlhw([nth as f64 * 16.0, 8.0, 10.0, 30.0]),
                    class,
                    extra: vec![],
                })
                .collect(),
        })
        .collect();
    Batch::collate(samples, 0)
}

fn evaluate(model: &CovaModel, batch: &Batch) -> Result<(Tensor, EvalMetrics)> {
    let logits = tch::no_grad(|| model.forward_t(batch, false))?;
    let mut predictions = Predictions::new();
    predictions.push_batch(batch, &logits, 0.0)?;
    Ok((logits, EvalMetrics::compute(&predictions)))
}


#[test]
fn checkpoint_round_trip() -> Result<()> {
    tch::manual_seed(3);
    let batch = validation_batch()?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("round_trip.ckpt");

    let trained = build(config(2, 2))?;
    let (expect_logits, expect_metrics) = evaluate(&trained, &batch)?;
    checkpoint::save(&trained, &path)?;

    tch::manual_seed(4);
    let restored = build(config(2, 2))?;
    let (fresh_logits, _) = evaluate(&restored, &batch)?;
    assert!(!fresh_logits.equal(&expect_logits));

    checkpoint::load(&restored, &path)?;
    let (logits, metrics) = evaluate(&restored, &batch)?;
    assert!(logits.equal(&expect_logits));
    assert_eq!(metrics, expect_metrics);
    Ok(())
}

#[test]
fn checkpoint_of_another_architecture_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("mismatch.ckpt");
    checkpoint::save(&build(config(0, 2))?, &path)?;

    // extra context variables are missing in the checkpoint
    assert!(checkpoint::load(&build(config(2, 2))?, &path).is_err());
    // the classifier input size differs
    assert!(checkpoint::load(&build(config(0, 3))?, &path).is_err());
    // the same architecture loads fine
    assert!(checkpoint::load(&build(config(0, 2))?, &path).is_ok());
    Ok(())
}
