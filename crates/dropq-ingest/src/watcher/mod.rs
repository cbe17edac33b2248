//! File discovery: OS notifications plus a stability gate

pub mod directory;
pub mod stability;

pub use directory::DirectoryWatcher;
pub use stability::{StabilityTracker, TickSummary};
