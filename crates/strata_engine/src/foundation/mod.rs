//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Frame clocks and delta-time smoothing
//! - Logging setup

pub mod logging;
pub mod time;
