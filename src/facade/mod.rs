//! Facade module
//!
//! The verbs editor commands invoke, one facade per session kind.

mod document;
mod reactor;
mod repl;
mod session;

pub use document::DocumentSnapshot;
pub use reactor::{Reactor, StatusButton};
pub use repl::Repl;
