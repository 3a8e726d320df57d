//! `warden-core` — configuration, error codes and shared types used by every
//! warden subsystem crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::WardenConfig;
pub use error::{Result, WardenError};
pub use types::{DisplayTime, Page, PageRequest};
