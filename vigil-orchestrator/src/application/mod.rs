//! Application layer: scan control surface and its collaborators

pub mod aggregator;
pub mod selection;
pub mod service;
pub mod workflow;
