//! Utilities shared between the Charla server binary and its tests.

pub mod logger;
pub mod time;
