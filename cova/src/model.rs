//! The web element classification network.

use crate::{class::N_CLASSES, common::*, dataset::Batch};
use tch_modules::{
    BackboneInit, BackboneKind, ClassifierHead, ClassifierHeadInit, ContextAggregator,
    ContextAggregatorInit, FeatureExtractor, NeighborOrder, RoiPool, RoiPoolInit,
};

/// Positional features per box: normalized `[cx, cy, w, h]`.
pub const POS_FEAT_DIM: usize = 4;

/// The architecture hyperparameters.
///
/// Checkpoints can only be loaded into a model built from the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub backbone: BackboneKind,
    /// Fine-tune the backbone. Otherwise it is a frozen feature extractor.
    #[serde(default = "default_trainable_backbone")]
    pub trainable_backbone: bool,
    /// Backbone weights in torchvision variable naming.
    #[serde(default)]
    pub pretrained_weights: Option<PathBuf>,
    #[serde(default = "default_roi_output_size")]
    pub roi_output_size: NonZeroUsize,
    /// Number of neighbors per box. Zero disables the context aggregator.
    #[serde(default)]
    pub context_size: usize,
    #[serde(default = "default_context_proj_dim")]
    pub context_proj_dim: NonZeroUsize,
    #[serde(default = "default_context_dim")]
    pub context_dim: NonZeroUsize,
    #[serde(default)]
    pub neighbor_order: NeighborOrder,
    #[serde(default)]
    pub use_pos_feat: bool,
    #[serde(default)]
    pub use_additional_feat: bool,
    #[serde(default = "default_hidden_dims")]
    pub hidden_dims: Vec<usize>,
    #[serde(default = "default_dropout")]
    pub dropout: R64,
}

fn default_trainable_backbone() -> bool {
    true
}

fn default_roi_output_size() -> NonZeroUsize {
    NonZeroUsize::new(3).unwrap()
}

fn default_context_proj_dim() -> NonZeroUsize {
    NonZeroUsize::new(256).unwrap()
}

fn default_context_dim() -> NonZeroUsize {
    NonZeroUsize::new(128).unwrap()
}

fn default_hidden_dims() -> Vec<usize> {
    vec![256]
}

fn default_dropout() -> R64 {
    r64(0.5)
}

#[derive(Debug, Clone)]
pub struct CovaModelInit {
    pub config: ModelConfig,
    /// Size of handcrafted features provided by the dataset.
    pub extra_dim: usize,
    pub device: Device,
}

impl CovaModelInit {
    pub fn build(self) -> Result<CovaModel> {
        let Self {
            config,
            extra_dim,
            device,
        } = self;
        let ModelConfig {
            backbone: backbone_kind,
            trainable_backbone,
            ref pretrained_weights,
            roi_output_size,
            context_size,
            context_proj_dim,
            context_dim,
            neighbor_order,
            use_pos_feat,
            use_additional_feat,
            ref hidden_dims,
            dropout,
        } = config;
        ensure!(
            !use_additional_feat || extra_dim > 0,
            "use_additional_feat is enabled, but the dataset provides no additional features"
        );

        // backbone variables live at the root for torchvision compatibility
        let mut backbone_vs = nn::VarStore::new(device);
        let backbone = BackboneInit {
            kind: backbone_kind,
        }
        .build(&backbone_vs.root());

        if let Some(path) = pretrained_weights {
            let missing = backbone_vs.load_partial(path).with_context(|| {
                format!("failed to load pretrained weights '{}'", path.display())
            })?;
            info!("loaded pretrained backbone weights from '{}'", path.display());
            if !missing.is_empty() {
                warn!(
                    "{} backbone variables are not in the pretrained weights: {:?}",
                    missing.len(),
                    missing
                );
            }
        }
        if !trainable_backbone {
            backbone_vs.freeze();
        }

        let head_vs = nn::VarStore::new(device);
        let root = head_vs.root();

        let roi_pool = RoiPoolInit {
            output_size: roi_output_size.get(),
            downsample_factor: backbone.downsample_factor(),
        }
        .build()?;
        let roi_feat_dim =
            (backbone.output_channels() * roi_pool.output_size().pow(2)) as usize;

        let context = (context_size > 0)
            .then(|| {
                ContextAggregatorInit {
                    in_dim: roi_feat_dim,
                    context_size,
                    proj_dim: context_proj_dim.get(),
                    out_dim: context_dim.get(),
                    order: neighbor_order,
                }
                .build(&root / "context")
            })
            .transpose()?;

        let extra_dim = use_additional_feat.then(|| extra_dim);
        let classifier_in_dim = roi_feat_dim
            + context.as_ref().map(|ctx| ctx.out_dim() as usize).unwrap_or(0)
            + if use_pos_feat { POS_FEAT_DIM } else { 0 }
            + extra_dim.unwrap_or(0);
        let classifier = ClassifierHeadInit {
            in_dim: classifier_in_dim,
            hidden_dims: hidden_dims.clone(),
            num_classes: N_CLASSES,
            dropout,
        }
        .build(&root / "classifier")?;

        debug!(
            "classifier input size {} (roi {}, context {}, positional {}, additional {})",
            classifier_in_dim,
            roi_feat_dim,
            context.is_some(),
            use_pos_feat,
            extra_dim.unwrap_or(0)
        );

        Ok(CovaModel {
            backbone_vs,
            head_vs,
            backbone,
            trainable_backbone,
            roi_pool,
            context,
            use_pos_feat,
            extra_dim,
            classifier,
        })
    }
}

/// Backbone, RoI pooling, optional context aggregator and classifier head.
///
/// Backbone and head parameters are kept in separate variable stores, so a
/// frozen backbone never reaches an optimizer.
#[derive(Debug)]
pub struct CovaModel {
    backbone_vs: nn::VarStore,
    head_vs: nn::VarStore,
    backbone: Box<dyn FeatureExtractor>,
    trainable_backbone: bool,
    roi_pool: RoiPool,
    context: Option<ContextAggregator>,
    use_pos_feat: bool,
    extra_dim: Option<usize>,
    classifier: ClassifierHead,
}

impl CovaModel {
    pub fn device(&self) -> Device {
        self.head_vs.device()
    }

    pub fn trainable_backbone(&self) -> bool {
        self.trainable_backbone
    }

    /// All variables, prefixed with `backbone.` or `head.`.
    pub fn named_variables(&self) -> Vec<(String, Tensor)> {
        let backbone = self
            .backbone_vs
            .variables()
            .into_iter()
            .map(|(name, var)| (format!("backbone.{}", name), var));
        let head = self
            .head_vs
            .variables()
            .into_iter()
            .map(|(name, var)| (format!("head.{}", name), var));
        backbone
            .chain(head)
            .sorted_by(|(lhs, _), (rhs, _)| lhs.cmp(rhs))
            .collect()
    }

    /// Number of parameters updated by the optimizers.
    pub fn num_trainable_parameters(&self) -> i64 {
        let head = self.head_vs.trainable_variables();
        let backbone = if self.trainable_backbone {
            self.backbone_vs.trainable_variables()
        } else {
            vec![]
        };
        head.iter()
            .chain(&backbone)
            .map(|var| var.size().iter().product::<i64>())
            .sum()
    }

    /// Builds Adam optimizers for the head and, if trainable, the backbone.
    pub fn optimizers(&self, lr: f64, weight_decay: f64) -> Result<ModelOptimizer> {
        let adam = || nn::Adam {
            wd: weight_decay,
            ..Default::default()
        };
        let head = adam().build(&self.head_vs, lr)?;
        let backbone = self
            .trainable_backbone
            .then(|| adam().build(&self.backbone_vs, lr))
            .transpose()?;
        Ok(ModelOptimizer { head, backbone })
    }

    /// Computes `[num_boxes, N_CLASSES]` logits for the boxes of a batch.
    ///
    /// With `train` unset, dropout is disabled and batch-norm layers use their
    /// running statistics. A frozen backbone always runs in inference mode.
    pub fn forward_t(&self, batch: &Batch, train: bool) -> Result<Tensor> {
        let device = self.device();
        let images = batch.images.to_device(device);

        let features = if self.trainable_backbone {
            self.backbone.forward_t(&images, train)
        } else {
            tch::no_grad(|| self.backbone.forward_t(&images, false))
        };

        let pooled = self
            .roi_pool
            .forward(&features, &batch.boxes, &batch.index)?
            .flatten(1, -1);
        let positions = batch.positions.to_device(device);

        let mut parts = vec![];
        if let Some(context) = &self.context {
            let context = context.forward_t(&pooled, &positions, &batch.boxes, &batch.index)?;
            parts.push(context);
        }
        if self.use_pos_feat {
            parts.push(positions.shallow_clone());
        }
        if let Some(extra_dim) = self.extra_dim {
            let extra = batch
                .extra
                .as_ref()
                .ok_or_else(|| format_err!("the batch has no additional features"))?;
            let (_, batch_extra_dim) = extra.size2()?;
            ensure!(
                batch_extra_dim as usize == extra_dim,
                "expect {} additional features, but get {}",
                extra_dim,
                batch_extra_dim
            );
            parts.push(extra.to_device(device));
        }
        parts.insert(0, pooled);

        let input = Tensor::cat(&parts, 1);
        Ok(self.classifier.forward_t(&input, train))
    }
}

/// Optimizers of the head and the optional trainable backbone.
pub struct ModelOptimizer {
    head: nn::Optimizer,
    backbone: Option<nn::Optimizer>,
}

impl ModelOptimizer {
    pub fn set_lr(&mut self, lr: f64) {
        self.head.set_lr(lr);
        if let Some(backbone) = &mut self.backbone {
            backbone.set_lr(lr);
        }
    }

    /// Back-propagates the loss and updates all optimized parameters.
    pub fn backward_step(&mut self, loss: &Tensor) {
        self.head.zero_grad();
        if let Some(backbone) = &mut self.backbone {
            backbone.zero_grad();
        }

        loss.backward();

        self.head.step();
        if let Some(backbone) = &mut self.backbone {
            backbone.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::ElementClass,
        dataset::{BoxRecord, PageSample},
    };

    fn test_config(context_size: usize) -> ModelConfig {
        ModelConfig {
            backbone: BackboneKind::AlexNet,
            trainable_backbone: true,
            pretrained_weights: None,
            roi_output_size: NonZeroUsize::new(2).unwrap(),
            context_size,
            context_proj_dim: NonZeroUsize::new(16).unwrap(),
            context_dim: NonZeroUsize::new(8).unwrap(),
            neighbor_order: NeighborOrder::Layout,
            use_pos_feat: true,
            use_additional_feat: false,
            hidden_dims: vec![32],
            dropout: r64(0.5),
        }
    }

    fn test_batch() -> Result<Batch> {
        use ElementClass::*;

        let samples = [vec![Background, Price, Title], vec![Image, Background]]
            .iter()
            .enumerate()
            .map(|(index, classes)| PageSample {
                id: format!("{}", index),
                image: Tensor::rand(&[3, 96, 96], (Kind::Float, Device::Cpu)),
                boxes: classes
                    .iter()
                    .enumerate()
                    .map(|(nth, &class)| BoxRecord {
                        tlbr: TLBR::from_tlhw([nth as f64 * 20.0, 4.0, 12.0, 40.0]),
                        class,
                        extra: vec![nth as f32],
                    })
                    .collect(),
            })
            .collect();
        Batch::collate(samples, 1)
    }

    #[test]
    fn logits_per_box() -> Result<()> {
        tch::manual_seed(1);
        let batch = test_batch()?;

        for context_size in [0, 2] {
            let model = CovaModelInit {
                config: test_config(context_size),
                extra_dim: 1,
                device: Device::Cpu,
            }
            .build()?;
            let logits = model.forward_t(&batch, true)?;
            assert_eq!(logits.size(), vec![5, N_CLASSES as i64]);
        }
        Ok(())
    }

    #[test]
    fn eval_mode_is_deterministic() -> Result<()> {
        tch::manual_seed(7);
        let batch = test_batch()?;
        let model = CovaModelInit {
            config: ModelConfig {
                use_additional_feat: true,
                ..test_config(2)
            },
            extra_dim: 1,
            device: Device::Cpu,
        }
        .build()?;

        let lhs = tch::no_grad(|| model.forward_t(&batch, false))?;
        let rhs = tch::no_grad(|| model.forward_t(&batch, false))?;
        assert!(lhs.equal(&rhs));
        Ok(())
    }

    #[test]
    fn frozen_backbone_is_not_optimized() -> Result<()> {
        let model = CovaModelInit {
            config: ModelConfig {
                trainable_backbone: false,
                ..test_config(0)
            },
            extra_dim: 0,
            device: Device::Cpu,
        }
        .build()?;
        assert!(model
            .backbone_vs
            .trainable_variables()
            .iter()
            .all(|var| !var.requires_grad()));
        let head_params: i64 = model
            .head_vs
            .trainable_variables()
            .iter()
            .map(|var| var.size().iter().product::<i64>())
            .sum();
        assert_eq!(model.num_trainable_parameters(), head_params);

        let batch = test_batch()?;
        let before: Vec<_> = model
            .backbone_vs
            .variables()
            .into_iter()
            .map(|(name, var)| (name, var.copy()))
            .collect();

        let mut optimizer = model.optimizers(1e-2, 0.0)?;
        let logits = model.forward_t(&batch, true)?;
        let loss = logits.log_softmax(-1, Kind::Float).mean(Kind::Float).neg();
        optimizer.backward_step(&loss);

        let after = model.backbone_vs.variables();
        for (name, var) in before {
            assert!(after[&name].equal(&var), "{} was updated", name);
        }
        Ok(())
    }

    #[test]
    fn missing_additional_features_are_rejected() {
        let result = CovaModelInit {
            config: ModelConfig {
                use_additional_feat: true,
                ..test_config(0)
            },
            extra_dim: 0,
            device: Device::Cpu,
        }
        .build();
        assert!(result.is_err());
    }

    #[test]
    fn parse_model_config() -> Result<()> {
        let config: ModelConfig =
            serde_json::from_str(r#"{ "backbone": "resnet", "context_size": 4 }"#)?;
        assert_eq!(config.backbone, BackboneKind::ResNet);
        assert!(config.trainable_backbone);
        assert_eq!(config.roi_output_size.get(), 3);
        assert_eq!(config.neighbor_order, NeighborOrder::Layout);
        Ok(())
    }
}
