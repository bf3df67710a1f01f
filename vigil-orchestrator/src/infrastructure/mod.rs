//! Infrastructure layer for the orchestrator

pub mod broadcaster;
pub mod cache;
pub mod registry;
pub mod scheduler;
pub mod store;
