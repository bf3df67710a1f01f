//! Shared helpers for the vigil binary crate tests

#![allow(dead_code)]

pub mod factories;

pub use factories::*;
