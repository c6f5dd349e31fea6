//! Connection Session
//!
//! Pairs a [`Connection`] with its [`ConnectionHandler`] and drives the hooks
//! in lifecycle order. Dispatch takes `&mut self`, so one session can never
//! run two handlers at once.

use tracing::{debug, info};

use super::{Connection, ConnectionHandler, ConnectionId, ConnectionState, PacketSender, TransportHandle};
use crate::error::ConnectionError;
use crate::packet::PacketStream;
use crate::Result;

pub struct ConnectionSession<H> {
    connection: Connection,
    handler: H,
    connected: bool,
}

impl<H: ConnectionHandler> ConnectionSession<H> {
    /// Create a session around a fresh, unbound connection
    pub fn new(handler: H) -> Self {
        Self {
            connection: Connection::new(),
            handler,
            connected: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// See [`Connection::initialize`]
    pub fn initialize<T, S>(&self, handle: T, sender: S) -> std::result::Result<(), ConnectionError>
    where
        T: TransportHandle,
        S: PacketSender,
    {
        self.connection.initialize(handle, sender)
    }

    /// Mark the connection connected and run `on_connected`.
    ///
    /// Fails unless the connection is initialized and has not been connected
    /// before.
    pub async fn connect(&mut self) -> Result<()> {
        self.connection.transition(
            ConnectionState::Initialized,
            ConnectionState::Connected,
            "connect",
        )?;
        self.connected = true;

        info!(connection_id = %self.id(), "Connection connected");
        self.handler.on_connected(&self.connection).await
    }

    /// Deliver one inbound packet to the handler
    pub async fn dispatch(&mut self, packet: PacketStream) -> Result<()> {
        if !self.connected {
            return Err(ConnectionError::InvalidState {
                id: self.id(),
                state: self.state(),
                operation: "dispatch",
            }
            .into());
        }

        if self.connection.is_disposed() {
            return Err(ConnectionError::Disposed(self.id()).into());
        }

        debug!(connection_id = %self.id(), len = packet.len(), "Dispatching packet");
        self.handler.handle_message(&self.connection, packet).await
    }

    /// Run `on_disconnected` if `on_connected` ran and it has not fired yet.
    ///
    /// Safe to call any number of times; later calls do nothing.
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            // Never connected: skip the hook but still close the lifecycle
            let _ = self.connection.transition(
                ConnectionState::Initialized,
                ConnectionState::Disconnected,
                "disconnect",
            );
            return Ok(());
        }

        self.connected = false;
        // Fails only if the connection was already disposed elsewhere
        let _ = self.connection.transition(
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            "disconnect",
        );

        info!(connection_id = %self.id(), "Connection disconnected");
        self.handler.on_disconnected(&self.connection).await
    }

    /// See [`Connection::dispose`]
    pub fn dispose(&self) -> bool {
        self.connection.dispose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordingHandler {
        events: Vec<String>,
        fail_on: Option<&'static str>,
    }

    impl ConnectionHandler for RecordingHandler {
        async fn on_connected(&mut self, _connection: &Connection) -> Result<()> {
            self.events.push("connected".to_string());
            Ok(())
        }

        async fn handle_message(&mut self, _connection: &Connection, mut packet: PacketStream) -> Result<()> {
            let body = packet.read_string()?;
            if self.fail_on == Some("message") {
                anyhow::bail!("handler failed on {}", body);
            }
            self.events.push(body);
            Ok(())
        }

        async fn on_disconnected(&mut self, _connection: &Connection) -> Result<()> {
            self.events.push("disconnected".to_string());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct CountingHandle(Arc<AtomicUsize>);

    impl TransportHandle for CountingHandle {
        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn text(value: &str) -> PacketStream {
        let mut packet = PacketStream::new();
        packet.write_string(value).unwrap();
        packet
    }

    fn initialized(handler: RecordingHandler) -> (ConnectionSession<RecordingHandler>, CountingHandle) {
        let session = ConnectionSession::new(handler);
        let handle = CountingHandle::default();
        session
            .initialize(handle.clone(), |_packet: PacketStream| {})
            .unwrap();
        (session, handle)
    }

    #[tokio::test]
    async fn test_full_lifecycle_order() {
        let (mut session, handle) = initialized(RecordingHandler::default());

        session.connect().await.unwrap();
        for body in ["p1", "p2", "p3"] {
            session.dispatch(text(body)).await.unwrap();
        }
        session.disconnect().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(session.dispose());
        assert!(!session.dispose());

        assert_eq!(
            session.handler().events,
            vec!["connected", "p1", "p2", "p3", "disconnected"]
        );
        assert_eq!(handle.0.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), ConnectionState::Disposed);
    }

    #[tokio::test]
    async fn test_connect_requires_initialize() {
        let mut session = ConnectionSession::new(RecordingHandler::default());

        let err = session.connect().await.unwrap_err();
        let err = err.downcast::<ConnectionError>().unwrap();
        assert!(matches!(
            err,
            ConnectionError::InvalidState { state: ConnectionState::Created, .. }
        ));
        assert!(session.handler().events.is_empty());
    }

    #[tokio::test]
    async fn test_connect_fires_once() {
        let (mut session, _) = initialized(RecordingHandler::default());

        session.connect().await.unwrap();
        assert!(session.connect().await.is_err());

        assert_eq!(session.handler().events, vec!["connected"]);
    }

    #[tokio::test]
    async fn test_dispatch_rejected_outside_connected() {
        let (mut session, _) = initialized(RecordingHandler::default());

        assert!(session.dispatch(text("early")).await.is_err());

        session.connect().await.unwrap();
        session.disconnect().await.unwrap();
        assert!(session.dispatch(text("late")).await.is_err());

        assert_eq!(session.handler().events, vec!["connected", "disconnected"]);
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_skips_hook() {
        let (mut session, _) = initialized(RecordingHandler::default());

        session.disconnect().await.unwrap();

        assert!(session.handler().events.is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_hook_runs_after_external_dispose() {
        let (mut session, handle) = initialized(RecordingHandler::default());
        session.connect().await.unwrap();

        session.connection().clone().dispose();
        assert!(session.dispatch(text("after")).await.is_err());
        session.disconnect().await.unwrap();

        assert_eq!(session.handler().events, vec!["connected", "disconnected"]);
        assert_eq!(handle.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_handler_errors_propagate() {
        let handler = RecordingHandler {
            fail_on: Some("message"),
            ..Default::default()
        };
        let (mut session, _) = initialized(handler);
        session.connect().await.unwrap();

        let err = session.dispatch(text("boom")).await.unwrap_err();
        assert_eq!(err.to_string(), "handler failed on boom");

        // A failed message does not end the session
        session.handler_mut().fail_on = None;
        session.dispatch(text("next")).await.unwrap();
        assert_eq!(session.handler().events, vec!["connected", "next"]);
    }
}
