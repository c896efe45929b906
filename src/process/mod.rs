//! Process module
//!
//! Spawning and supervising the external REPL and reactor processes.

mod session;
mod spawner;

#[cfg(test)]
pub mod testing;

pub use session::*;
pub use spawner::*;
