//! JSON-RPC server implementation for lectern-daemon.
//!
//! This module provides the server that listens on TCP and handles incoming
//! JSON-RPC requests from clients.

use anyhow::{Context, Result};
use jsonrpsee::server::{Server, ServerHandle};
use std::net::SocketAddr;
use tracing::info;

use super::handlers::{ApiImpl, LecternApiServer};

/// Start the JSON-RPC API server on `bind_address`.
///
/// # Returns
///
/// A tuple of (ServerHandle, SocketAddr) - the handle keeps the server running,
/// and the address shows where it's listening. Binding port 0 picks a free port.
pub async fn start_server(bind_address: &str, api: ApiImpl) -> Result<(ServerHandle, SocketAddr)> {
    info!("Starting JSON-RPC server on {}", bind_address);

    let server = Server::builder()
        .build(bind_address)
        .await
        .with_context(|| format!("Failed to build JSON-RPC server on {}", bind_address))?;

    let addr = server
        .local_addr()
        .context("Failed to get server address")?;
    info!("JSON-RPC server listening on {}", addr);

    let handle = server.start(api.into_rpc());

    info!("JSON-RPC server started successfully");

    Ok((handle, addr))
}
