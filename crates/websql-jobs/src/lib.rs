//! WebSQL Jobs - cron-triggered tenant scripts
//!
//! Each running job owns one timer task. Every trigger spawns the run in its
//! own task so a failing or panicking run is only logged.

pub mod runner;
pub mod scheduler;

pub use runner::execute_job;
pub use scheduler::JobScheduler;
