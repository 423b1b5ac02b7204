//! Game-side accept loop.

use super::handlers::drive_connection;
use crate::connection::ConnectionManager;
use crate::error::LinkError;
use crate::game::GameLink;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use world_core::ShutdownState;

/// Accepts AI connections until shutdown. Each connection is driven on its
/// own task; authentication happens in [`GameLink`].
pub async fn serve_game_link(
    link: Arc<GameLink>,
    listener: TcpListener,
    connections: Arc<ConnectionManager>,
    shutdown: ShutdownState,
) -> Result<(), LinkError> {
    info!("🎧 Game link listening on {}", listener.local_addr()?);

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                info!("🛑 Game link accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    let (connection, outbound) = connections.add_connection(remote_addr);
                    link.on_connect(connection, remote_addr);
                    tokio::spawn(drive_connection(
                        stream,
                        connection,
                        outbound,
                        link.clone(),
                        connections.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => error!("❌ Failed to accept link connection: {}", e),
            }
        }
    }

    connections.close_all();
    Ok(())
}
