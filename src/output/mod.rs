//! Output module
//!
//! Turns raw process output into the transcript shown to the user.

mod sink;
mod transcript;

pub use sink::*;
pub use transcript::*;
