//! Misc utilities.

mod lr_scheduler;
mod rate_counter;

pub use lr_scheduler::*;
pub use rate_counter::*;

/// The timestamp format of run directories.
pub const FILE_STRFTIME: &str = "%Y-%m-%d-%H-%M-%S.%3f%z";
