// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker listener: accepts TCP connections from workers, performs the
//! capability handshake, and pumps messages between the socket and the
//! engine. One reader loop and one writer task per connection; the
//! writer side is what the engine sees as the worker's [`Connection`].

use forge_engine::{Connection, ConnectionLost, Engine};
use forge_wire::{read_frame, write_frame, Hello, MasterMessage, Welcome, WorkerMessage};
use std::sync::Arc;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Engine-facing handle for one worker socket: sends go through an
/// unbounded channel drained by the writer task, so the engine never
/// blocks on a slow socket.
struct SocketConnection {
    tx: mpsc::UnboundedSender<MasterMessage>,
    peer: String,
}

impl Connection for SocketConnection {
    fn send(&self, msg: MasterMessage) -> Result<(), ConnectionLost> {
        self.tx.send(msg).map_err(|_| ConnectionLost(format!("writer gone for {}", self.peer)))
    }
}

/// Accept worker connections until shutdown.
pub async fn run(engine: Engine, listener: TcpListener, shutdown: CancellationToken) {
    info!(addr = ?listener.local_addr().ok(), "worker listener ready");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let engine = engine.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(engine, stream, shutdown).await {
                            debug!(%addr, error = %e, "worker connection closed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "worker accept failed"),
            }
        }
    }
    debug!("worker listener stopped");
}

async fn serve(
    engine: Engine,
    stream: TcpStream,
    shutdown: CancellationToken,
) -> Result<(), forge_wire::ProtocolError> {
    let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
    let (mut reader, mut writer) = stream.into_split();

    // Handshake: the worker leads with who it is and what it can do.
    let hello: Hello = read_frame(&mut reader).await?;
    let name = hello.info.name.clone();
    let master = engine.master_name().to_string();
    write_frame(&mut writer, &Welcome { master }).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let conn: Arc<dyn Connection> = Arc::new(SocketConnection { tx, peer: peer.clone() });
    if let Err(e) = engine.worker_attached(hello.info, conn.clone()) {
        warn!(worker = name.as_str(), peer = peer.as_str(), error = %e, "rejecting worker");
        return Ok(());
    }
    let writer_task = tokio::spawn(write_loop(writer, rx));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = read_frame::<_, WorkerMessage>(&mut reader) => match frame {
                Ok(msg) => engine.handle_worker_message(&name, msg),
                Err(e) => {
                    debug!(worker = name.as_str(), error = %e, "worker read ended");
                    break;
                }
            }
        }
    }

    engine.worker_connection_lost(&name, &conn);
    writer_task.abort();
    Ok(())
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<MasterMessage>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "worker write failed");
            break;
        }
    }
}
