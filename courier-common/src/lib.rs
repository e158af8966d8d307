//! Pieces shared by every courier crate: the log macros, subscriber setup and
//! the shutdown signal passed between the trigger and its tasks.

pub mod logging;

pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
