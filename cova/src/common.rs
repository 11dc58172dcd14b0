pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use bbox::{prelude::*, TLBR};
pub use futures::stream::{self, StreamExt as _, TryStreamExt as _};
pub use indexmap::IndexMap;
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info, warn};
pub use noisy_float::prelude::*;
pub use rand::{prelude::*, rngs::StdRng, seq::SliceRandom};
pub use serde::{Deserialize, Serialize};
pub use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{
    nn::{self, OptimizerConfig as _},
    vision, Device, IndexOp, Kind, Tensor,
};
pub use tch_modules::RaggedIndex;
