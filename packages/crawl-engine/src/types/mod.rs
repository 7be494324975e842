//! Data types for URLs, jobs and deliveries.

pub mod envelope;
pub mod job;
pub mod status;
pub mod url;
