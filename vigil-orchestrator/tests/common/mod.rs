//! Common test utilities for vigil-orchestrator

#![allow(dead_code)]

pub mod helpers;
pub mod mocks;
pub mod store;

pub use helpers::*;
pub use mocks::*;
pub use store::*;
