//! Connection coordinator
//!
//! Turns raw room-code text into a connection attempt on a [`Transport`] and
//! tracks the attempt through to connected or failed.
//!
//! ```text
//! Idle --submit(valid)--> Connecting --connected--> Connected
//!   ^                         |                        |
//!   +------ Failed <----------+---- disconnected ------+
//! ```
//!
//! `Failed` is transient: listeners see it, the coordinator settles in
//! `Idle` so the user can retry. Nothing retries automatically.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use roomlink_core::config::{Settings, LOOPBACK_ADDRESS};
use roomlink_core::room_code::{self, DecodeError, RoomAddress};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::transport::{lock, DisconnectReason, ListenerHandle, Transport};

/// Connection attempt state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    /// Only ever observed through [`CoordinatorEvent::StateChanged`]
    Failed,
}

/// Why a submitted room code was not acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("please enter a room code")]
    Empty,

    #[error("already attempting to connect")]
    AlreadyConnecting,

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Outcome of [`ConnectionCoordinator::submit`]: the resolved target on success
pub type SubmitResult = std::result::Result<RoomAddress, SubmitError>;

/// The last resolved target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub attempt_id: Uuid,
    pub address: RoomAddress,
    /// Resolved through the `localhost` alias rather than a room code
    pub via_alias: bool,
    pub connected_at: Option<DateTime<Utc>>,
}

/// Notifications for the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    StateChanged(ConnectionState),
    Connected(ConnectionInfo),
    TransportFailure {
        attempt_id: Uuid,
        reason: DisconnectReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub loopback_address: String,
    /// `None` waits for the transport indefinitely
    pub connect_timeout: Option<Duration>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            loopback_address: LOOPBACK_ADDRESS.to_string(),
            connect_timeout: None,
        }
    }
}

impl From<&Settings> for CoordinatorSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            loopback_address: settings.loopback_address.clone(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

struct Attempt {
    state: ConnectionState,
    info: Option<ConnectionInfo>,
}

struct Shared<T> {
    transport: Arc<T>,
    settings: CoordinatorSettings,
    attempt: Mutex<Attempt>,
    event_tx: broadcast::Sender<CoordinatorEvent>,
}

/// Drives one transport's connection attempts.
///
/// Listeners on the transport are registered in [`ConnectionCoordinator::new`]
/// and removed when the coordinator is dropped.
pub struct ConnectionCoordinator<T: Transport + 'static> {
    shared: Arc<Shared<T>>,
    _listeners: Vec<ListenerHandle>,
}

impl<T: Transport + 'static> ConnectionCoordinator<T> {
    pub fn new(transport: Arc<T>, settings: CoordinatorSettings) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            transport,
            settings,
            attempt: Mutex::new(Attempt {
                state: ConnectionState::Idle,
                info: None,
            }),
            event_tx,
        });

        // Weak so the transport's listener list does not keep us alive
        let events = shared.transport.events();
        let weak = Arc::downgrade(&shared);
        let on_connected = events.on_connected(move || {
            if let Some(shared) = weak.upgrade() {
                shared.connected();
            }
        });
        let weak = Arc::downgrade(&shared);
        let on_disconnected = events.on_disconnected(move |reason| {
            if let Some(shared) = weak.upgrade() {
                shared.fail(None, reason.clone());
            }
        });

        Self {
            shared,
            _listeners: vec![on_connected, on_disconnected],
        }
    }

    /// Resolve user text and start connecting.
    ///
    /// Input errors are returned without touching state or the transport.
    pub fn submit(&self, raw: &str) -> SubmitResult {
        let input = raw.trim();
        if input.is_empty() {
            warn!("Please enter a valid room code");
            return Err(SubmitError::Empty);
        }

        let shared = &self.shared;
        let (info, timeout) = {
            let mut attempt = lock(&shared.attempt);
            if attempt.state == ConnectionState::Connecting {
                warn!("Already attempting to connect");
                return Err(SubmitError::AlreadyConnecting);
            }

            let via_alias = room_code::is_localhost_alias(input);
            let address = if via_alias {
                RoomAddress::new(
                    shared.settings.loopback_address.clone(),
                    shared.transport.target_port(),
                )
            } else {
                room_code::decode(input).map_err(|e| {
                    warn!(error = %e, "Rejected room code");
                    SubmitError::from(e)
                })?
            };

            let info = ConnectionInfo {
                attempt_id: Uuid::new_v4(),
                address,
                via_alias,
                connected_at: None,
            };
            attempt.state = ConnectionState::Connecting;
            attempt.info = Some(info.clone());
            (info, shared.settings.connect_timeout)
        };

        shared.transport.set_target_address(&info.address.host);
        if !info.via_alias {
            shared.transport.set_target_port(info.address.port);
        }

        info!(
            attempt_id = %info.attempt_id,
            address = %info.address.host,
            port = info.address.port,
            alias = info.via_alias,
            "Attempting to connect"
        );
        shared.publish(CoordinatorEvent::StateChanged(ConnectionState::Connecting));

        if let Some(timeout) = timeout {
            arm_timeout(Arc::downgrade(shared), info.attempt_id, timeout);
        }

        // Called without the lock held; a transport may report synchronously
        shared.transport.connect();

        Ok(info.address)
    }

    /// The transport finished connecting
    pub fn on_external_connected(&self) {
        self.shared.connected();
    }

    /// The transport failed to connect or dropped an established connection
    pub fn on_external_disconnected(&self) {
        self.shared.fail(None, DisconnectReason::Closed);
    }

    /// Like [`Self::on_external_disconnected`] with a specific reason
    pub fn on_external_failure(&self, reason: DisconnectReason) {
        self.shared.fail(None, reason);
    }

    /// Ask the transport to hang up. The state change arrives through the
    /// transport's disconnect callback.
    pub fn disconnect(&self) {
        self.shared.transport.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared.attempt).state
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        lock(&self.shared.attempt).info.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.shared.transport
    }
}

impl<T: Transport + 'static> Shared<T> {
    fn connected(&self) {
        let info = {
            let mut attempt = lock(&self.attempt);
            if attempt.state != ConnectionState::Connecting {
                debug!(state = ?attempt.state, "Ignoring connected callback");
                return;
            }
            attempt.state = ConnectionState::Connected;
            let Some(info) = attempt.info.as_mut() else {
                return;
            };
            info.connected_at = Some(Utc::now());
            info.clone()
        };

        info!(attempt_id = %info.attempt_id, address = %info.address, "Connected to server");
        self.publish(CoordinatorEvent::StateChanged(ConnectionState::Connected));
        self.publish(CoordinatorEvent::Connected(info));
    }

    /// Fail the current attempt. With `only_attempt` set, only that attempt
    /// may be failed and only while still connecting.
    fn fail(&self, only_attempt: Option<Uuid>, reason: DisconnectReason) -> bool {
        let attempt_id = {
            let mut attempt = lock(&self.attempt);
            let current = attempt.info.as_ref().map(|info| info.attempt_id);
            let live = match only_attempt {
                Some(id) => attempt.state == ConnectionState::Connecting && current == Some(id),
                None => matches!(
                    attempt.state,
                    ConnectionState::Connecting | ConnectionState::Connected
                ),
            };
            if !live {
                debug!(state = ?attempt.state, reason = %reason, "Ignoring disconnect callback");
                return false;
            }
            attempt.state = ConnectionState::Idle;
            if let Some(info) = attempt.info.as_mut() {
                info.connected_at = None;
            }
            current.unwrap_or_else(Uuid::nil)
        };

        error!(
            attempt_id = %attempt_id,
            reason = %reason,
            "Failed to connect to the server or disconnected"
        );
        self.publish(CoordinatorEvent::TransportFailure { attempt_id, reason });
        self.publish(CoordinatorEvent::StateChanged(ConnectionState::Failed));
        self.publish(CoordinatorEvent::StateChanged(ConnectionState::Idle));
        true
    }

    fn publish(&self, event: CoordinatorEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}

fn arm_timeout<T: Transport + 'static>(shared: Weak<Shared<T>>, attempt_id: Uuid, timeout: Duration) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!("Connect timeout configured without an async runtime; waiting indefinitely");
        return;
    };

    runtime.spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.fail(Some(attempt_id), DisconnectReason::TimedOut) {
            shared.transport.disconnect();
        }
    });
}
