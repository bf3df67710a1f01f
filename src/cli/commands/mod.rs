//! CLI command implementations

pub mod adapters;
pub mod profiles;
pub mod scan;
