//! Locus resolves "where is the user" into a delivery address.

pub mod config;
pub mod location;
pub mod logging;
pub mod server;
