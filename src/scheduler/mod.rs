// src/scheduler/mod.rs

//! Durable scheduled-query tasks: time triggers, a due-task dispatcher,
//! and result history with ratings.

pub mod dispatcher;
pub mod schedule;
pub mod store;
pub mod types;

pub use dispatcher::run_dispatcher;
pub use schedule::compute_next_run;
pub use store::TaskStore;
pub use types::{ScheduleType, ScheduledTask, TaskResult, TaskStatus};
