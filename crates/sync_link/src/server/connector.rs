//! AI-side uplink with reconnect.

use super::handlers::drive_connection;
use crate::ai::AiLink;
use crate::connection::ConnectionManager;
use crate::error::LinkError;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{info, warn};
use world_core::ShutdownState;

/// Keeps the uplink to the Game process alive until shutdown.
///
/// Lost or refused connections are retried after the configured delay. The
/// loop only gives up when the Game process rejects this address, returning
/// [`LinkError::UnauthorizedAddress`].
pub async fn run_uplink(
    link: Arc<AiLink>,
    connections: Arc<ConnectionManager>,
    shutdown: ShutdownState,
) -> Result<(), LinkError> {
    let peer_addr = link.config().peer_address;
    let delay = link.config().reconnect_delay();

    loop {
        let attempt = tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            attempt = TcpStream::connect(peer_addr) => attempt,
        };

        match attempt {
            Ok(stream) => {
                info!("📡 Uplink connected to Game process at {}", peer_addr);
                let (connection, outbound) = connections.add_connection(peer_addr);
                match link.on_connected(connection) {
                    Ok(partition) => {
                        drive_connection(
                            stream,
                            connection,
                            outbound,
                            link.clone(),
                            connections.clone(),
                            shutdown.clone(),
                        )
                        .await;
                        // The login result may still be queued behind the EOF.
                        link.drain(partition).await;
                    }
                    Err(e) => {
                        warn!("❌ Login exchange not sent: {}", e);
                        connections.remove_connection(connection);
                        link.on_disconnected(connection);
                    }
                }

                if link.is_fatal() {
                    return Err(LinkError::UnauthorizedAddress(peer_addr.to_string()));
                }
                if shutdown.is_shutdown_initiated() {
                    return Ok(());
                }
                warn!("📴 Uplink to {} lost, reconnecting in {:?}", peer_addr, delay);
            }
            Err(e) => {
                warn!("📴 Uplink to {} failed: {}, retrying in {:?}", peer_addr, e, delay);
            }
        }

        tokio::select! {
            _ = shutdown.wait() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
