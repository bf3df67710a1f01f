//! Vigil Core - Shared domain model and adapter contract
//!
//! This crate holds everything the other Vigil crates agree on:
//!
//! ```text
//! vigil-core
//! ├── domain/
//! │   ├── target     Target identity and type inference
//! │   ├── scan       Scan lifecycle state machine
//! │   ├── run        ScannerRun lifecycle
//! │   ├── finding    Severity, findings, normalized results, summaries
//! │   ├── progress   Progress events published to observers
//! │   └── adapter    ScannerAdapter trait and descriptors
//! ├── config/        Typed configuration sections (no file loading)
//! └── logging        tracing-subscriber initialization
//! ```

pub mod config;
pub mod domain;
pub mod logging;

pub use config::Config;
pub use logging::{LoggingInitError, init_tracing};
