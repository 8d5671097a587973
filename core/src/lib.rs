//! # Zapper Core
//!
//! Drives a security-scanning daemon through its HTTP control API.
//!
//! * **[`api`]**: the control API trait and its HTTP client.
//! * **[`daemon`]**: supervision of the daemon process.
//! * **[`context`]**: scan scope, authentication and users.
//! * **[`scanner`]**: spider and active scan polling.
//! * **[`report`]**: report export and threshold filtering.
//! * **[`external`]**: the packaged API scan script.
//! * **[`workflow`]**: the two end-to-end run pipelines.

pub mod api;
pub mod context;
pub mod daemon;
pub mod error;
pub mod external;
pub mod report;
pub mod scanner;
pub mod workflow;

pub use error::RunError;
