//! hydro-monitor: pulls hydroponic telemetry from antares, decodes it and
//! serves it to the dashboard.

pub mod antares;
pub mod config;
pub mod decoder;
pub mod domain;
pub mod server;
pub mod simulator;
pub mod store;
pub mod sync;
pub mod telemetry;
