//! Newsletter mail dispatcher
//!
//! Reads its configuration, drains the outbound queue into the email
//! provider at no more than the provider's per-second send rate, and either
//! exits (`courier run`) or repeats on a schedule (`courier serve`).

pub mod controller;
pub mod trigger;

pub use controller::Courier;
pub use trigger::{ServeSummary, Trigger, TriggerConfig};
