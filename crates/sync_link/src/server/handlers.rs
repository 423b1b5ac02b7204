//! Per-connection I/O.

use crate::connection::{ConnectionId, ConnectionManager, Outbound};
use crate::protocol::FrameDecoder;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use world_core::ShutdownState;

const READ_BUFFER: usize = 8 * 1024;

/// Receives what a connection reads. Implementations queue frames on the
/// connection's partition so they apply in receipt order, and queue the
/// disconnect behind them.
pub trait LinkHandler: Send + Sync + 'static {
    /// Returns `false` if the frame could not be queued; the connection is
    /// then closed.
    fn submit_frame(self: &Arc<Self>, connection: ConnectionId, frame: Vec<u8>) -> bool;

    fn submit_disconnect(self: &Arc<Self>, connection: ConnectionId);
}

/// Runs one connection until either side closes it or shutdown begins.
///
/// Spawns no tasks of its own: the reader and writer halves run
/// concurrently inside this future and whichever finishes first ends the
/// connection.
pub async fn drive_connection<H: LinkHandler>(
    stream: TcpStream,
    connection: ConnectionId,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    handler: Arc<H>,
    connections: Arc<ConnectionManager>,
    shutdown: ShutdownState,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(connection = %connection, error = %e, "TCP_NODELAY not set");
    }
    let (mut reader, mut writer) = stream.into_split();

    let incoming = async {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; READ_BUFFER];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    trace!(connection = %connection, "peer closed the stream");
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!(connection = %connection, error = %e, "read failed");
                    return;
                }
            };
            decoder.push(&buf[..n]);
            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => {
                        if !handler.submit_frame(connection, frame) {
                            debug!(connection = %connection, "frame not accepted, closing");
                            return;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(connection = %connection, error = %e, "corrupt stream, closing");
                        return;
                    }
                }
            }
        }
    };

    let outgoing = async {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Frame(frame) => {
                    if let Err(e) = writer.write_all(&frame).await {
                        debug!(connection = %connection, error = %e, "write failed");
                        return;
                    }
                }
                Outbound::Close => {
                    let _ = writer.shutdown().await;
                    return;
                }
            }
        }
    };

    tokio::select! {
        _ = incoming => {}
        _ = outgoing => {}
        _ = shutdown.wait() => {}
    }

    connections.remove_connection(connection);
    handler.submit_disconnect(connection);
}
