pub mod catalog;
pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod panel;
pub mod reports;
pub mod telemetry;
pub mod workspace;
