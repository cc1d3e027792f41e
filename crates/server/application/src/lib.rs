//! Application services for the Hodei fleet autoscaler.

pub mod autoscaler;
