//! HTTP front end for the blob store.

pub mod config;
pub mod server;
pub mod telemetry;
