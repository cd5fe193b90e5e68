pub mod commands;
pub mod modules;

pub use modules::common::error::UninstallerError;
pub use modules::common::utils;
pub use modules::supervisor;
pub use modules::supervisor::{RunOptions, UninstallEntry, UninstallStatus};
pub use modules::target;
