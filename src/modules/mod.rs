pub mod common;
pub mod supervisor;
pub mod target;
