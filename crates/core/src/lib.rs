//! Roomlink Core Library
//!
//! Room code encoding and shared settings for the Roomlink lobby tools.

pub mod config;
pub mod error;
pub mod room_code;

pub use config::Settings;
pub use error::{Error, Result};
pub use room_code::{decode, encode, DecodeError, RoomAddress, RoomCode};
