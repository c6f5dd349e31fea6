//! Receive Loop
//!
//! Reads a connection's socket, decodes frames and dispatches them to the
//! session one at a time, then tears the session down in lifecycle order.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use anyhow::Context;
use bytes::BytesMut;
use futures::FutureExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, error, instrument, warn};

use super::socket::{closed, CloseSignal};
use crate::connection::{ConnectionHandler, ConnectionId, ConnectionSession};
use crate::error::ConnectionError;
use crate::packet::PacketCodec;
use crate::Result;

/// Connect the session, pump inbound packets, then disconnect and dispose
#[instrument(skip_all, fields(connection_id = %session.id()))]
pub(crate) async fn serve<H: ConnectionHandler>(
    mut session: ConnectionSession<H>,
    reader: OwnedReadHalf,
    close: CloseSignal,
    codec: PacketCodec,
    buffer_size: usize,
) -> Result<()> {
    if let Err(e) = guarded(session.id(), session.connect()).await {
        teardown(&mut session).await;
        return Err(e.context("Connection setup failed"));
    }

    drive(session, reader, close, codec, buffer_size).await
}

/// Pump inbound packets for an already connected session until the socket
/// closes, then disconnect and dispose it
#[instrument(skip_all, fields(connection_id = %session.id()))]
pub(crate) async fn drive<H: ConnectionHandler>(
    mut session: ConnectionSession<H>,
    mut reader: OwnedReadHalf,
    close: CloseSignal,
    codec: PacketCodec,
    buffer_size: usize,
) -> Result<()> {
    let result = receive_loop(&mut session, &mut reader, &close, codec, buffer_size).await;
    teardown(&mut session).await;
    result
}

async fn receive_loop<H: ConnectionHandler>(
    session: &mut ConnectionSession<H>,
    reader: &mut OwnedReadHalf,
    close: &CloseSignal,
    codec: PacketCodec,
    buffer_size: usize,
) -> Result<()> {
    let mut buffer = BytesMut::with_capacity(buffer_size);
    let mut close_rx = close.subscribe();

    loop {
        buffer.reserve(buffer_size);

        let read = tokio::select! {
            read = reader.read_buf(&mut buffer) => read.context("Failed to read from socket")?,
            _ = closed(&mut close_rx) => {
                debug!("Close requested, stopping receive loop");
                return Ok(());
            }
        };

        if read == 0 {
            if !buffer.is_empty() {
                warn!("Peer closed with {} bytes of an incomplete frame", buffer.len());
            }
            debug!("Peer closed the connection");
            return Ok(());
        }

        while let Some(packet) = codec.decode(&mut buffer)? {
            let Err(e) = guarded(session.id(), session.dispatch(packet)).await else {
                continue;
            };

            match e.downcast_ref::<ConnectionError>() {
                Some(ConnectionError::HandlerPanicked { .. }) => return Err(e),
                Some(ConnectionError::Disposed(_)) => {
                    debug!("Connection disposed, dropping inbound packets");
                    return Ok(());
                }
                _ => error!("Message handler failed: {:#}", e),
            }
        }
    }
}

/// Run the disconnect hook, logging its failure, then dispose
pub(crate) async fn teardown<H: ConnectionHandler>(session: &mut ConnectionSession<H>) {
    if let Err(e) = guarded(session.id(), session.disconnect()).await {
        error!("Disconnect handler failed: {:#}", e);
    }
    session.dispose();
}

/// Await a handler future, turning a panic into [`ConnectionError::HandlerPanicked`]
pub(crate) async fn guarded<F, T>(id: ConnectionId, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!("Handler panicked: {}", message);
            Err(ConnectionError::HandlerPanicked { id, message }.into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
