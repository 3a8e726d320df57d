//! `warden-scheduler` — schedule lifecycle over a durable store and a live scheduler.
//!
//! # Overview
//!
//! A schedule exists twice: as a durable row in `task_schedules` (intent) and
//! as an entry in an external live scheduler that actually fires it (fact).
//! [`engine::ScheduleEngine`] keeps the two aligned through per-operation
//! ordering rules; [`reconcile::Reconciler`] reads them back together.
//!
//! # Schedule types
//!
//! | Type                     | Live recurrence                           |
//! |--------------------------|-------------------------------------------|
//! | `WEEKLY_SPECIFIC_DAYS`   | Cron at midnight UTC on the named weekdays |
//! | `MONTHLY_SPECIFIC_DATES` | Cron at midnight UTC on the listed dates   |
//! | `ONCE`                   | Single fire at the given UTC instant       |
//! | `PERIODIC`               | Fixed interval in minutes                  |
//! | `IMMEDIATE`              | No live entry; dispatched ad hoc           |
//!
//! # Backends
//!
//! Live: [`redbeat::RedisLiveScheduler`] (RedBeat key layout) or
//! [`memory::MemoryLiveScheduler`]. Execution: [`queue::RedisQueueBackend`] or
//! [`adhoc::MemoryExecutionBackend`].

pub mod adhoc;
pub mod db;
pub mod engine;
pub mod error;
pub mod live;
pub mod memory;
pub mod queue;
pub mod reconcile;
pub mod recurrence;
pub mod redbeat;
pub mod requests;
pub mod store;
pub mod types;

pub use adhoc::{AdHocExecutor, ExecutionBackend, MemoryExecutionBackend};
pub use engine::ScheduleEngine;
pub use error::{ExecError, LiveError, Result, SchedulerError};
pub use live::LiveScheduler;
pub use memory::MemoryLiveScheduler;
pub use queue::RedisQueueBackend;
pub use reconcile::Reconciler;
pub use redbeat::RedisLiveScheduler;
pub use requests::RequestStore;
pub use store::ScheduleStore;
pub use types::{
    CreateOutcome, Schedule, SchedulePatch, ScheduleRequest, ScheduleType, ScheduleView,
    TaskRequest,
};
