//! # Edgewatch Core
//!
//! Shared configuration and error types for the Edgewatch agent.
//!
//! Everything here is plain data: the scheduler, queue, and diagnostics
//! crates all build on these types but none of them is pulled in as a
//! dependency, keeping the core free of runtime concerns.

pub mod config;
pub mod error;

pub use config::AgentConfig;
pub use error::{EdgewatchError, Result};
