//! Connection Entity
//!
//! A [`Connection`] is created with nothing but an identity. The host later
//! binds a transport handle and a send delegate to it in one step, and
//! releases the handle through [`Connection::dispose`].

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tracing::{debug, trace};

use super::ConnectionId;
use crate::error::ConnectionError;
use crate::packet::PacketStream;

/// A transport resource owned by a connection
pub trait TransportHandle: Send + Sync + 'static {
    /// Close the underlying transport. Called at most once per connection.
    fn release(&self);
}

/// Outbound write path bound to a connection at initialization.
///
/// Implementations must not wait for the peer: queue the packet and return.
pub trait PacketSender: Send + Sync + 'static {
    fn send(&self, packet: PacketStream);
}

impl<F> PacketSender for F
where
    F: Fn(PacketStream) + Send + Sync + 'static,
{
    fn send(&self, packet: PacketStream) {
        self(packet)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Created = 0,
    Initialized = 1,
    Connected = 2,
    Disconnected = 3,
    Disposed = 4,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Created,
            1 => ConnectionState::Initialized,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnected,
            _ => ConnectionState::Disposed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Created => "created",
            ConnectionState::Initialized => "initialized",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Shared handle to one connection.
///
/// Clones refer to the same connection, so a clone can be moved into a
/// background task that keeps sending after the handler returns. The
/// transport is released when the connection is disposed or when the last
/// clone is dropped, whichever happens first.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    state: AtomicU8,
    sender: OnceLock<Box<dyn PacketSender>>,
    transport: Mutex<Option<Box<dyn TransportHandle>>>,
}

impl Connection {
    /// Create a connection that is not yet bound to any transport
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                state: AtomicU8::new(ConnectionState::Created as u8),
                sender: OnceLock::new(),
                transport: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Whether a transport and send delegate have been bound
    pub fn is_initialized(&self) -> bool {
        self.inner.sender.get().is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ConnectionState::Disposed
    }

    /// Bind the transport handle and its send delegate.
    ///
    /// Both are attached under one lock, so disposal never observes one
    /// without the other. A connection accepts exactly one binding: a second
    /// call fails with [`ConnectionError::AlreadyInitialized`]. Binding a
    /// disposed connection fails with [`ConnectionError::Disposed`] and the
    /// offered handle is released immediately.
    pub fn initialize<T, S>(&self, handle: T, sender: S) -> Result<(), ConnectionError>
    where
        T: TransportHandle,
        S: PacketSender,
    {
        let id = self.id();
        let mut transport = self.inner.lock_transport();

        if self.inner.sender.get().is_some() {
            return Err(ConnectionError::AlreadyInitialized(id));
        }

        match self.inner.state.compare_exchange(
            ConnectionState::Created as u8,
            ConnectionState::Initialized as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if ConnectionState::from_u8(current) == ConnectionState::Disposed => {
                drop(transport);
                handle.release();
                return Err(ConnectionError::Disposed(id));
            }
            Err(_) => return Err(ConnectionError::AlreadyInitialized(id)),
        }

        // Cannot fail: the emptiness check above ran under the same lock
        let _ = self.inner.sender.set(Box::new(sender));
        *transport = Some(Box::new(handle));

        debug!(connection_id = %id, "Connection initialized");
        Ok(())
    }

    /// Queue `packet` on the bound write path.
    ///
    /// Does nothing before [`Connection::initialize`] and after disposal.
    pub fn send(&self, packet: PacketStream) {
        if self.is_disposed() {
            trace!(connection_id = %self.id(), "Dropping packet sent on disposed connection");
            return;
        }

        match self.inner.sender.get() {
            Some(sender) => sender.send(packet),
            None => trace!(connection_id = %self.id(), "Dropping packet sent before initialization"),
        }
    }

    /// Release the transport handle.
    ///
    /// Returns `true` for the call that performed the release and `false`
    /// for every later call.
    pub fn dispose(&self) -> bool {
        self.inner.dispose()
    }

    /// Move from `from` to `to`, failing if the connection is elsewhere
    pub(crate) fn transition(
        &self,
        from: ConnectionState,
        to: ConnectionState,
        operation: &'static str,
    ) -> Result<(), ConnectionError> {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| match ConnectionState::from_u8(current) {
                ConnectionState::Disposed => ConnectionError::Disposed(self.id()),
                state => ConnectionError::InvalidState {
                    id: self.id(),
                    state,
                    operation,
                },
            })
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn lock_transport(&self) -> MutexGuard<'_, Option<Box<dyn TransportHandle>>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispose(&self) -> bool {
        let previous = self
            .state
            .swap(ConnectionState::Disposed as u8, Ordering::AcqRel);
        if ConnectionState::from_u8(previous) == ConnectionState::Disposed {
            return false;
        }

        let handle = self.lock_transport().take();
        if let Some(handle) = handle {
            handle.release();
        }

        debug!(connection_id = %self.id, "Connection disposed");
        true
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct CountingHandle(Arc<AtomicUsize>);

    impl TransportHandle for CountingHandle {
        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recording_sender() -> (Arc<StdMutex<Vec<PacketStream>>>, impl PacketSender) {
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        (sent, move |packet: PacketStream| sink.lock().unwrap().push(packet))
    }

    fn packet(body: &[u8]) -> PacketStream {
        PacketStream::from(body)
    }

    #[test]
    fn test_new_connection_is_created() {
        let connection = Connection::new();
        assert_eq!(connection.state(), ConnectionState::Created);
        assert!(!connection.is_initialized());
        assert!(!connection.is_disposed());
    }

    #[test]
    fn test_send_before_initialize_is_noop() {
        let connection = Connection::new();
        connection.send(packet(b"early"));

        let (sent, sender) = recording_sender();
        connection
            .initialize(CountingHandle::default(), sender)
            .unwrap();

        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_forwards_exactly_once() {
        let connection = Connection::new();
        let (sent, sender) = recording_sender();
        connection
            .initialize(CountingHandle::default(), sender)
            .unwrap();

        connection.send(packet(b"ping"));

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].as_bytes(), b"ping");
    }

    #[test]
    fn test_second_initialize_is_rejected() {
        let connection = Connection::new();
        let first = CountingHandle::default();
        let second = CountingHandle::default();
        let (_, sender) = recording_sender();
        connection.initialize(first.clone(), sender).unwrap();

        let (_, sender) = recording_sender();
        let err = connection.initialize(second.clone(), sender).unwrap_err();

        assert_eq!(err, ConnectionError::AlreadyInitialized(connection.id()));
        assert_eq!(connection.state(), ConnectionState::Initialized);
        assert_eq!(first.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispose_releases_once() {
        let connection = Connection::new();
        let handle = CountingHandle::default();
        let (_, sender) = recording_sender();
        connection.initialize(handle.clone(), sender).unwrap();

        assert!(connection.dispose());
        assert!(!connection.dispose());
        assert!(!connection.dispose());

        assert_eq!(handle.0.load(Ordering::SeqCst), 1);
        assert_eq!(connection.state(), ConnectionState::Disposed);
    }

    #[test]
    fn test_dispose_before_initialize() {
        let connection = Connection::new();
        assert!(connection.dispose());

        let handle = CountingHandle::default();
        let (sent, sender) = recording_sender();
        let err = connection.initialize(handle.clone(), sender).unwrap_err();

        assert_eq!(err, ConnectionError::Disposed(connection.id()));
        assert_eq!(handle.0.load(Ordering::SeqCst), 1);

        connection.send(packet(b"late"));
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_after_dispose_is_noop() {
        let connection = Connection::new();
        let (sent, sender) = recording_sender();
        connection
            .initialize(CountingHandle::default(), sender)
            .unwrap();
        connection.dispose();

        connection.send(packet(b"late"));

        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_dropping_last_clone_releases_handle() {
        let handle = CountingHandle::default();
        {
            let connection = Connection::new();
            let clone = connection.clone();
            let (_, sender) = recording_sender();
            connection.initialize(handle.clone(), sender).unwrap();
            drop(connection);
            assert_eq!(handle.0.load(Ordering::SeqCst), 0);
            drop(clone);
        }
        assert_eq!(handle.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_identity_is_stable() {
        let connection = Connection::new();
        let id = connection.id();
        let (_, sender) = recording_sender();

        connection
            .initialize(CountingHandle::default(), sender)
            .unwrap();
        assert_eq!(connection.id(), id);
        connection.send(packet(b"x"));
        assert_eq!(connection.id(), id);
        connection.dispose();
        assert_eq!(connection.id(), id);
    }

    #[test]
    fn test_transition_reports_current_state() {
        let connection = Connection::new();
        let err = connection
            .transition(ConnectionState::Initialized, ConnectionState::Connected, "connect")
            .unwrap_err();

        assert_eq!(
            err,
            ConnectionError::InvalidState {
                id: connection.id(),
                state: ConnectionState::Created,
                operation: "connect",
            }
        );
    }
}
