//! The training loop.

mod state;
mod trainer;

pub use state::*;
pub use trainer::*;
