//! Domain model for the Hodei fleet autoscaler.
//!
//! Contains the agent fleet and job catalog types, the ports to the
//! external collaborators (agent management, scheduling feed, job
//! operations), and the value objects the scaling policy is built on
//! (resource dimensions, token buckets, clocks).

pub mod agents;
pub mod jobs;
pub mod limiter;
pub mod scheduling;
pub mod shared_kernel;
pub mod testing;
pub mod time;

pub use shared_kernel::{DomainError, Result, Tier};
