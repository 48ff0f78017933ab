//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod objects;
pub mod telemetry;
