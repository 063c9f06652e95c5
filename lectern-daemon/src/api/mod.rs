//! JSON-RPC API module for the lectern-daemon.
//!
//! This module exposes the debug harness and source testing to clients
//! (authoring tools, editors, scripts) over a JSON-RPC interface via TCP.

pub mod handlers;
pub mod server;

pub use handlers::{ApiImpl, LecternApiServer};
pub use server::start_server;
