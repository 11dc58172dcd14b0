//! Neural network building blocks for web element classification.

mod common;

pub mod backbone;
pub mod classifier;
pub mod context;
pub mod cross_entropy;
pub mod ragged;
pub mod roi_pool;

pub use backbone::*;
pub use classifier::*;
pub use context::*;
pub use cross_entropy::*;
pub use ragged::*;
pub use roi_pool::*;
