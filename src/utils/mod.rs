//! Utility functions and helpers.

pub mod fs;
pub mod message;
