//! Pretrained convolutional feature extractors.
//!
//! Variable names follow the torchvision layouts, so converted torchvision
//! weights can be loaded into the variable store directly.

use crate::common::*;

/// A convolutional network mapping images to spatial feature grids.
pub trait FeatureExtractor
where
    Self: Debug + Send,
{
    /// The ratio of the input image size to the feature grid size.
    fn downsample_factor(&self) -> i64;

    /// The number of channels of the feature grid.
    fn output_channels(&self) -> i64;

    /// Maps a `[batch, 3, h, w]` image tensor to a `[batch, c, h', w']` feature grid.
    fn forward_t(&self, images: &Tensor, train: bool) -> Tensor;
}

/// The choice of backbone architecture.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackboneKind {
    AlexNet,
    ResNet,
}

#[derive(Debug, Clone)]
pub struct BackboneInit {
    pub kind: BackboneKind,
}

impl BackboneInit {
    pub fn build<'p>(self, path: impl Borrow<nn::Path<'p>>) -> Box<dyn FeatureExtractor> {
        let path = path.borrow();
        match self.kind {
            BackboneKind::AlexNet => Box::new(AlexNetFeatures::new(path)),
            BackboneKind::ResNet => Box::new(ResNet18Features::new(path)),
        }
    }
}

pub use alexnet::*;
mod alexnet {
    use super::*;

    /// The convolutional part of AlexNet, including the final max pooling.
    #[derive(Debug)]
    pub struct AlexNetFeatures {
        convs: Vec<(nn::Conv2D, bool)>,
    }

    impl AlexNetFeatures {
        pub fn new<'p>(path: impl Borrow<nn::Path<'p>>) -> Self {
            let path = path.borrow() / "features";

            // (index in torchvision's features, in_c, out_c, ksize, stride, padding, max pool after)
            let layers: [(usize, i64, i64, i64, i64, i64, bool); 5] = [
                (0, 3, 64, 11, 4, 2, true),
                (3, 64, 192, 5, 1, 2, true),
                (6, 192, 384, 3, 1, 1, false),
                (8, 384, 256, 3, 1, 1, false),
                (10, 256, 256, 3, 1, 1, true),
            ];

            let convs = layers
                .into_iter()
                .map(|(index, in_c, out_c, ksize, stride, padding, pool)| {
                    let conv = nn::conv2d(
                        &path / index,
                        in_c,
                        out_c,
                        ksize,
                        nn::ConvConfig {
                            stride,
                            padding,
                            ..Default::default()
                        },
                    );
                    (conv, pool)
                })
                .collect();

            Self { convs }
        }
    }

    impl FeatureExtractor for AlexNetFeatures {
        fn downsample_factor(&self) -> i64 {
            32
        }

        fn output_channels(&self) -> i64 {
            256
        }

        fn forward_t(&self, images: &Tensor, _train: bool) -> Tensor {
            self.convs
                .iter()
                .fold(images.shallow_clone(), |xs, (conv, pool)| {
                    let xs = xs.apply(conv).relu();
                    if *pool {
                        xs.max_pool2d(&[3, 3], &[2, 2], &[0, 0], &[1, 1], false)
                    } else {
                        xs
                    }
                })
        }
    }
}

pub use resnet::*;
mod resnet {
    use super::*;

    fn conv2d<'p>(
        path: impl Borrow<nn::Path<'p>>,
        in_c: i64,
        out_c: i64,
        ksize: i64,
        stride: i64,
        padding: i64,
    ) -> nn::Conv2D {
        nn::conv2d(
            path,
            in_c,
            out_c,
            ksize,
            nn::ConvConfig {
                stride,
                padding,
                bias: false,
                ..Default::default()
            },
        )
    }

    #[derive(Debug)]
    struct BasicBlock {
        conv1: nn::Conv2D,
        bn1: nn::BatchNorm,
        conv2: nn::Conv2D,
        bn2: nn::BatchNorm,
        downsample: Option<(nn::Conv2D, nn::BatchNorm)>,
    }

    impl BasicBlock {
        fn new<'p>(path: impl Borrow<nn::Path<'p>>, in_c: i64, out_c: i64, stride: i64) -> Self {
            let path = path.borrow();
            let conv1 = conv2d(path / "conv1", in_c, out_c, 3, stride, 1);
            let bn1 = nn::batch_norm2d(path / "bn1", out_c, Default::default());
            let conv2 = conv2d(path / "conv2", out_c, out_c, 3, 1, 1);
            let bn2 = nn::batch_norm2d(path / "bn2", out_c, Default::default());
            let downsample = (stride != 1 || in_c != out_c).then(|| {
                let path = path / "downsample";
                (
                    conv2d(&path / 0, in_c, out_c, 1, stride, 0),
                    nn::batch_norm2d(&path / 1, out_c, Default::default()),
                )
            });

            Self {
                conv1,
                bn1,
                conv2,
                bn2,
                downsample,
            }
        }

        fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
            let Self {
                conv1,
                bn1,
                conv2,
                bn2,
                downsample,
            } = self;

            let ys = xs
                .apply(conv1)
                .apply_t(bn1, train)
                .relu()
                .apply(conv2)
                .apply_t(bn2, train);
            let shortcut = match downsample {
                Some((conv, bn)) => xs.apply(conv).apply_t(bn, train),
                None => xs.shallow_clone(),
            };

            (ys + shortcut).relu()
        }
    }

    /// ResNet-18 without the global pooling and the fully connected layer.
    #[derive(Debug)]
    pub struct ResNet18Features {
        conv1: nn::Conv2D,
        bn1: nn::BatchNorm,
        layers: Vec<BasicBlock>,
    }

    impl ResNet18Features {
        pub fn new<'p>(path: impl Borrow<nn::Path<'p>>) -> Self {
            let path = path.borrow();
            let conv1 = conv2d(path / "conv1", 3, 64, 7, 2, 3);
            let bn1 = nn::batch_norm2d(path / "bn1", 64, Default::default());

            // (layer name, in_c, out_c, stride of the first block)
            let stages = [
                ("layer1", 64, 64, 1),
                ("layer2", 64, 128, 2),
                ("layer3", 128, 256, 2),
                ("layer4", 256, 512, 2),
            ];
            let layers = stages
                .into_iter()
                .flat_map(|(name, in_c, out_c, stride)| {
                    let path = path / name;
                    [
                        BasicBlock::new(&path / 0, in_c, out_c, stride),
                        BasicBlock::new(&path / 1, out_c, out_c, 1),
                    ]
                })
                .collect();

            Self { conv1, bn1, layers }
        }
    }

    impl FeatureExtractor for ResNet18Features {
        fn downsample_factor(&self) -> i64 {
            32
        }

        fn output_channels(&self) -> i64 {
            512
        }

        fn forward_t(&self, images: &Tensor, train: bool) -> Tensor {
            let xs = images
                .apply(&self.conv1)
                .apply_t(&self.bn1, train)
                .relu()
                .max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false);

            self.layers
                .iter()
                .fold(xs, |xs, block| block.forward_t(&xs, train))
        }
    }
}
