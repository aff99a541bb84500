//! Scheduling: cron parsing, due-user selection and the job loops

pub mod schedule;
pub mod scheduler;
pub mod selector;

pub use schedule::{CronSchedule, ScheduleError};
pub use scheduler::Scheduler;
pub use selector::DueUserSelector;
