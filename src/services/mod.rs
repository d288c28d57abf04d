// src/services/mod.rs

pub mod lifecycle;
pub mod scheduler;
pub mod scoring;

pub use lifecycle::{AttemptService, StartOutcome};
pub use scheduler::{JobHandler, Poller, Scheduler, TickReport};
