//! Configuration module
//!
//! Handles loading the workspace toolchain settings.

mod settings;

pub use settings::*;
