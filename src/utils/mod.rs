//! Shared infrastructure: logging setup and canonical serialization.

pub mod logging;
pub mod serialization;
