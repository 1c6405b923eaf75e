//! Lobby protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.

use serde::{Deserialize, Serialize};

/// Lobby protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Client asks to enter the lobby
    Join { player_name: String },

    /// Host accepted the join
    Welcome {
        lobby_name: String,
        players: Vec<String>,
    },

    /// Host refused the join
    Rejected { reason: String },

    /// Current players (broadcast on join/leave)
    PlayerList { players: Vec<String> },

    /// Client is leaving
    Leave,

    /// Keepalive
    Ping,

    Pong,

    /// Host is shutting down
    ServerShutdown,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
