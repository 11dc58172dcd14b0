//! Training program configuration format.

use crate::common::*;

pub use dataset::*;
pub use logging::*;
pub use training::*;

/// The main training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub dataset: DatasetConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Self = json5::from_str(&text)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(weights) = &self.training.class_weights {
            ensure!(
                weights.len() == N_CLASSES,
                "class_weights must have {} values, but get {}",
                N_CLASSES,
                weights.len()
            );
            ensure!(
                weights.iter().all(|weight| weight.raw() >= 0.0),
                "class_weights must be non-negative"
            );
        }
        ensure!(
            self.training.weight_decay >= 0.0,
            "weight_decay must be non-negative"
        );
        Ok(())
    }
}

mod dataset {
    use super::*;

    /// Dataset options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct DatasetConfig {
        /// The directory of `<id>.png` images and `<id>.json` annotations.
        pub data_dir: PathBuf,
        /// The directory of `train_imgs.txt`, `val_imgs.txt` and `test_imgs.txt`.
        pub split_dir: PathBuf,
        /// Images are cropped or padded to this square size.
        #[serde(default = "default_img_height")]
        pub img_height: NonZeroUsize,
        /// Optional CSV file with `img_id` and `domain` columns.
        #[serde(default)]
        pub domain_file: Option<PathBuf>,
        /// Optional list of domains to report in the test breakdown.
        #[serde(default)]
        pub test_domain_file: Option<PathBuf>,
        #[serde(default = "default_num_workers")]
        pub num_workers: NonZeroUsize,
        /// Number of batches buffered ahead of the training loop.
        #[serde(default = "default_prefetch")]
        pub prefetch: NonZeroUsize,
    }

    fn default_img_height() -> NonZeroUsize {
        NonZeroUsize::new(1280).unwrap()
    }

    fn default_num_workers() -> NonZeroUsize {
        NonZeroUsize::new(4).unwrap()
    }

    fn default_prefetch() -> NonZeroUsize {
        NonZeroUsize::new(2).unwrap()
    }
}

mod training {
    use super::*;

    /// The training options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct TrainingConfig {
        #[serde(with = "tch_serde::serde_device")]
        pub device: Device,
        pub num_epochs: NonZeroUsize,
        /// Validate every this many epochs. The first epoch is always validated.
        #[serde(default = "default_eval_interval")]
        pub eval_interval: NonZeroUsize,
        pub batch_size: NonZeroUsize,
        /// Learning rate scheduling strategy.
        pub lr_schedule: LearningRateSchedule,
        #[serde(default = "default_weight_decay")]
        pub weight_decay: R64,
        /// Per-class loss weights indexed by class label.
        #[serde(default)]
        pub class_weights: Option<Vec<R64>>,
        /// Fraction of background boxes kept in training batches.
        #[serde(default)]
        pub sampling_fraction: SamplingFraction,
        #[serde(default = "default_seed")]
        pub seed: u64,
    }

    /// The learning rate scheduling strategy.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub enum LearningRateSchedule {
        /// Use constant learning rate.
        Constant { lr: R64 },
        /// Use specific learning rate from specified steps.
        StepWise { steps: Vec<(usize, R64)> },
    }

    fn default_eval_interval() -> NonZeroUsize {
        NonZeroUsize::new(5).unwrap()
    }

    fn default_weight_decay() -> R64 {
        r64(0.0)
    }

    fn default_seed() -> u64 {
        1
    }
}

mod logging {
    use super::*;

    /// Output options.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct LoggingConfig {
        /// Each run creates a timestamped sub-directory here.
        pub dir: PathBuf,
    }
}
