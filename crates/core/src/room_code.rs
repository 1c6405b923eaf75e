//! Room code encoding and decoding
//!
//! Room code format: base64(utf8("<address>:<port>"))
//!
//! Uses the standard base64 alphabet with padding so codes stay compatible
//! with ones generated by earlier clients.

use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Reserved alias that bypasses decoding and resolves to the loopback address
pub const LOCALHOST_ALIAS: &str = "localhost";

/// Why a room code could not be turned into an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Not valid base64, not valid UTF-8, or decodes to nothing
    #[error("room code is not valid base64 text")]
    Malformed,

    /// Decoded text is not a single `address:port` pair
    #[error("room code does not contain an address:port pair")]
    BadFormat,

    /// Port is not an integer in 0..=65535
    #[error("room code has an invalid port")]
    BadPort,
}

/// A resolved server endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomAddress {
    pub host: String,
    pub port: u16,
}

impl RoomAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Encode this address as a room code
    pub fn to_room_code(&self) -> RoomCode {
        encode(&self.host, self.port)
    }
}

impl fmt::Display for RoomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opaque, shareable room code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn decode(&self) -> Result<RoomAddress, DecodeError> {
        decode(&self.0)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Encode an address and port into a room code.
///
/// The caller is responsible for passing a non-empty address.
pub fn encode(address: &str, port: u16) -> RoomCode {
    RoomCode(STANDARD.encode(format!("{}:{}", address, port)))
}

/// Decode a room code back into an address and port.
pub fn decode(code: &str) -> Result<RoomAddress, DecodeError> {
    let bytes = STANDARD.decode(code).map_err(|_| DecodeError::Malformed)?;
    let text = String::from_utf8(bytes).map_err(|_| DecodeError::Malformed)?;
    if text.is_empty() {
        return Err(DecodeError::Malformed);
    }

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() != 2 {
        return Err(DecodeError::BadFormat);
    }

    let host = parts[0];
    if host.is_empty() {
        return Err(DecodeError::BadFormat);
    }

    let port = parse_port(parts[1]).ok_or(DecodeError::BadPort)?;

    Ok(RoomAddress::new(host, port))
}

/// Whether `input` is the reserved loopback alias (case-insensitive)
pub fn is_localhost_alias(input: &str) -> bool {
    input.eq_ignore_ascii_case(LOCALHOST_ALIAS)
}

fn parse_port(segment: &str) -> Option<u16> {
    // Parse wide first so "70000" is a range error rather than an overflow
    let value: i64 = segment.trim().parse().ok()?;
    u16::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_for(text: &str) -> String {
        STANDARD.encode(text)
    }

    #[test]
    fn test_encode_known_value() {
        let code = encode("192.168.1.5", 7777);
        assert_eq!(code.as_str(), "MTkyLjE2OC4xLjU6Nzc3Nw==");
    }

    #[test]
    fn test_encode_is_deterministic() {
        assert_eq!(encode("example.org", 25565), encode("example.org", 25565));
    }

    #[test]
    fn test_roundtrip_edges() {
        for (host, port) in [("10.0.0.1", 0u16), ("game.example.org", 65535), ("h", 7777)] {
            let decoded = decode(encode(host, port).as_str()).unwrap();
            assert_eq!(decoded, RoomAddress::new(host, port));
        }
    }

    #[test]
    fn test_roundtrip_non_ascii_host() {
        let decoded = decode(encode("서버.local", 4242).as_str()).unwrap();
        assert_eq!(decoded.host, "서버.local");
        assert_eq!(decoded.port, 4242);
    }

    #[test]
    fn test_decode_not_base64() {
        assert_eq!(decode("not base64!!"), Err(DecodeError::Malformed));
        assert_eq!(decode("abc"), Err(DecodeError::Malformed));
        assert_eq!(decode("localhost"), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let code = STANDARD.encode([0xff, 0xfe, b':', b'1']);
        assert_eq!(decode(&code), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_decode_empty_payload() {
        assert_eq!(decode(""), Err(DecodeError::Malformed));
    }

    #[test]
    fn test_decode_missing_separator() {
        assert_eq!(decode("dGVzdA=="), Err(DecodeError::BadFormat));
    }

    #[test]
    fn test_decode_too_many_separators() {
        assert_eq!(decode(&code_for("a:b:c")), Err(DecodeError::BadFormat));
        assert_eq!(decode(&code_for("::1:7777")), Err(DecodeError::BadFormat));
    }

    #[test]
    fn test_decode_empty_host() {
        assert_eq!(decode(&code_for(":7777")), Err(DecodeError::BadFormat));
    }

    #[test]
    fn test_decode_bad_port() {
        assert_eq!(
            decode(&code_for("10.0.0.1:70000")),
            Err(DecodeError::BadPort)
        );
        assert_eq!(decode(&code_for("host:-1")), Err(DecodeError::BadPort));
        assert_eq!(decode(&code_for("host:abc")), Err(DecodeError::BadPort));
        assert_eq!(decode(&code_for("host:")), Err(DecodeError::BadPort));
    }

    #[test]
    fn test_decode_lenient_port_text() {
        assert_eq!(decode(&code_for("host: 80")).unwrap().port, 80);
        assert_eq!(decode(&code_for("host:+80")).unwrap().port, 80);
    }

    #[test]
    fn test_localhost_alias() {
        assert!(is_localhost_alias("localhost"));
        assert!(is_localhost_alias("LocalHost"));
        assert!(!is_localhost_alias("localhost2"));
    }

    #[test]
    fn test_room_code_helpers() {
        let addr = RoomAddress::new("192.168.1.5", 7777);
        let code = addr.to_room_code();
        assert_eq!(code.decode().unwrap(), addr);
        assert_eq!(addr.to_string(), "192.168.1.5:7777");
        let parsed: RoomCode = code.as_str().parse().unwrap();
        assert_eq!(parsed, code);
    }
}
