//! Toolchain module
//!
//! Detects the Elm generation a project uses and plans the command line for
//! each session kind.

mod planner;
mod version;

pub use planner::*;
pub use version::*;
