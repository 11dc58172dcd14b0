//! The building blocks of the web element classification model.

mod common;
pub mod checkpoint;
pub mod class;
pub mod dataset;
pub mod metrics;
pub mod model;

pub use class::*;
