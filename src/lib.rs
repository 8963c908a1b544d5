// Core components
pub mod connectivity;
pub mod queue;
pub mod replay;

// Ambient layers
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Service wiring
pub mod app;
