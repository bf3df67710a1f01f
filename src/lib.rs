//! Vigil - scanner orchestration from the command line
//!
//! The binary wires configuration, logging and the integrated adapters into
//! a [`vigil_orchestrator::ScanService`] and drives it from the CLI.

pub mod app;
pub mod cli;
pub mod config;

pub use app::{AppHandle, create_app};
pub use vigil_core::{Config, init_tracing};
