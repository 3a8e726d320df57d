//! `warden-catalog` — the task catalog.
//!
//! Durable definitions of what *can* be scheduled: tasks, the parameters each
//! task declares, and the execution methods that describe how an executor is
//! dispatched. The scheduler reads from this crate but never writes to it.

pub mod catalog;
pub mod db;
pub mod error;
pub mod methods;
pub mod params;
pub mod tasks;
pub mod types;

pub use catalog::TaskCatalog;
pub use error::{CatalogError, Result};
pub use types::{
    AddParameters, ExecutionMethod, ExecutionMethodPatch, NewExecutionMethod, NewParameter,
    NewTask, ParameterPatch, Task, TaskParameter, TaskPatch,
};
