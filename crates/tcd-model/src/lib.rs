//! Plain data types shared by the task runner crates.
//!
//! Nothing here knows about threads or runtimes: ids, lifecycle states,
//! progress snapshots and the registry views exposed to callers.

mod domain;
pub use domain::*;

mod error;
pub use error::ModelError;
