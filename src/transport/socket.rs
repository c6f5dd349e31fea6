//! TCP Socket Plumbing
//!
//! Splits an accepted or dialed `TcpStream` into the pieces a connection
//! needs: a read half for the receive loop, a [`SocketHandle`] the connection
//! owns, and a [`FrameSender`] feeding a dedicated writer task.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::connection::{PacketSender, TransportHandle};
use crate::packet::{PacketCodec, PacketStream};

/// One-way latch telling the reader loop and writer task to stop
#[derive(Debug, Clone)]
pub struct CloseSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn close(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once the signal behind `rx` has been closed
pub async fn closed(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Transport handle owned by a TCP-backed connection
#[derive(Debug)]
pub struct SocketHandle {
    peer_addr: SocketAddr,
    close: CloseSignal,
}

impl SocketHandle {
    pub fn new(peer_addr: SocketAddr, close: CloseSignal) -> Self {
        Self { peer_addr, close }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl TransportHandle for SocketHandle {
    fn release(&self) {
        debug!("Releasing socket to {}", self.peer_addr);
        self.close.close();
    }
}

/// Send delegate that frames packets and queues them for the writer task
#[derive(Debug, Clone)]
pub struct FrameSender {
    codec: PacketCodec,
    queue: mpsc::UnboundedSender<Bytes>,
}

impl FrameSender {
    pub fn new(codec: PacketCodec, queue: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { codec, queue }
    }
}

impl PacketSender for FrameSender {
    fn send(&self, packet: PacketStream) {
        match self.codec.encode(&packet) {
            Ok(frame) => {
                if self.queue.send(frame).is_err() {
                    trace!("Writer task gone, dropping outbound packet");
                }
            }
            Err(e) => warn!("Dropping outbound packet: {}", e),
        }
    }
}

/// Pieces of a split TCP stream
pub struct SocketTransport {
    pub reader: OwnedReadHalf,
    pub handle: SocketHandle,
    pub sender: FrameSender,
    pub close: CloseSignal,
    pub writer: JoinHandle<()>,
}

impl SocketTransport {
    /// Split `stream` and spawn its writer task
    pub fn split(stream: TcpStream, peer_addr: SocketAddr, codec: PacketCodec) -> Self {
        let (reader, writer) = stream.into_split();
        let close = CloseSignal::new();

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Bytes>();
        let writer = spawn_writer_task(writer, queue_rx, close.clone());

        Self {
            reader,
            handle: SocketHandle::new(peer_addr, close.clone()),
            sender: FrameSender::new(codec, queue_tx),
            close,
            writer,
        }
    }
}

/// Write queued frames in order until the queue ends or `close` trips.
///
/// Frames already queued when the close arrives are still written before the
/// write half is shut down.
fn spawn_writer_task(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    close: CloseSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut close_rx = close.subscribe();

        loop {
            tokio::select! {
                biased;

                frame = rx.recv() => {
                    let Some(mut buf) = frame else { break };
                    if writer.write_all_buf(&mut buf).await.is_err() {
                        close.close();
                        return;
                    }

                    // coalesce bursts to cut syscalls
                    while let Ok(mut more) = rx.try_recv() {
                        if writer.write_all_buf(&mut more).await.is_err() {
                            close.close();
                            return;
                        }
                    }
                }

                _ = closed(&mut close_rx) => {
                    while let Ok(mut pending) = rx.try_recv() {
                        if writer.write_all_buf(&mut pending).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
    })
}
