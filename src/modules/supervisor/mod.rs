//! 单个卸载任务的监视核心

pub mod activity;
pub mod blacklist;
pub mod entry;
pub mod exit_code;
pub mod options;
pub mod process_tree;
pub mod status;
pub mod system;

#[cfg(test)]
pub(crate) mod testing;

pub use entry::{EntrySnapshot, UninstallEntry};
pub use options::{PollTiming, RunOptions};
pub use status::{CancellationRequest, UninstallStatus};
pub use system::{NativeSystem, SystemAccess};
