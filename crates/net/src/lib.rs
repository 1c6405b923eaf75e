//! Roomlink Network Library
//!
//! Resolves room codes into lobby connections.
//!
//! # Architecture
//!
//! - **Coordinator**: turns user-entered room codes into connection attempts
//! - **Transport**: the connect/disconnect boundary the coordinator drives
//! - **Client**: TCP transport that joins a lobby host
//! - **Server**: lobby host started by the player who creates a lobby
//! - **Protocol**: Length-prefixed JSON messages
//!
//! # Usage
//!
//! ```ignore
//! // Host creates a lobby and shares its room code
//! let host = LobbyHost::start(7777, "Lobby".into(), 8).await?;
//! println!("{}", host.room_code("192.168.1.5"));
//!
//! // Another player joins with that code
//! let transport = Arc::new(TcpTransport::new(7777, "player"));
//! let coordinator = ConnectionCoordinator::new(transport, CoordinatorSettings::default());
//! let mut events = coordinator.subscribe();
//! coordinator.submit("MTkyLjE2OC4xLjU6Nzc3Nw==")?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let CoordinatorEvent::StateChanged(ConnectionState::Connected) = event {
//!         break;
//!     }
//! }
//! ```

pub mod client;
pub mod coordinator;
pub mod error;
mod frame;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::TcpTransport;
pub use coordinator::{
    ConnectionCoordinator, ConnectionInfo, ConnectionState, CoordinatorEvent,
    CoordinatorSettings, SubmitError, SubmitResult,
};
pub use error::{Error, Result};
pub use protocol::Message;
pub use server::LobbyHost;
pub use transport::{DisconnectReason, ListenerHandle, Transport, TransportEvents};
