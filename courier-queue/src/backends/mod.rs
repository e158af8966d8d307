//! Queue backends
//!
//! - `memory`: in-process queue for tests and development
//! - `file`: spool directory of JSON messages written by a producer

pub mod file;
pub mod memory;

pub use file::{FileQueue, FileQueueBuilder};
pub use memory::MemoryQueue;
