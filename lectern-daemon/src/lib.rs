//! Lectern daemon library
//!
//! This module exports the internal components of the daemon for testing purposes.

pub mod api;
pub mod config;
pub mod debug;
