pub use anyhow::{ensure, Result};
pub use itertools::{izip, Itertools};
pub use log::debug;
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{borrow::Borrow, fmt::Debug, iter, ops::Range};
pub use strum::{AsRefStr, Display, EnumString};
pub use tch::{
    nn::{self, Module as _, ModuleT as _, OptimizerConfig as _, RNN as _},
    Device, IndexOp, Kind, Reduction, Tensor,
};
