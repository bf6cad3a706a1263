//! Intake daemon library - exposes modules for testing.

pub mod orchestrator;
pub mod routes;
pub mod server;
