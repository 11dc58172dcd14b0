//! Dataset loading, splitting, sampling and batching.

mod batch;
mod dataset;
mod domain;
mod loader;
mod record;
mod sampling;
mod split;

pub use batch::*;
pub use dataset::*;
pub use domain::*;
pub use loader::*;
pub use record::*;
pub use sampling::*;
pub use split::*;
