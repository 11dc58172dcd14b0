//! Common imports from external crates.

pub use anyhow::{bail, ensure, Context, Result};
pub use chrono::Local;
pub use cova::{
    checkpoint,
    dataset::{
        BatchLoader, BatchLoaderInit, DomainInfo, PageDataset, SamplingFraction, Splits,
    },
    metrics::{DomainMetrics, EvalMetrics, Predictions},
    model::{CovaModel, CovaModelInit, ModelConfig, ModelOptimizer},
    ElementClass, CLASS_NAMES, N_CLASSES,
};
pub use itertools::{izip, Itertools as _};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::HashSet,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};
pub use tch::{Device, Reduction, Tensor};
pub use tch_modules::CrossEntropyLoss;
pub use tracing::{debug, info, info_span};
