//! `roomlink host` - create a lobby and share its room code

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use anyhow::{Context, Result};
use roomlink_core::Settings;
use roomlink_net::LobbyHost;
use tracing::{debug, info, warn};

pub struct HostOptions {
    pub port: Option<u16>,
    pub public_address: Option<String>,
    pub name: Option<String>,
    pub copy: bool,
}

pub async fn run(settings: &Settings, options: HostOptions) -> Result<()> {
    let port = options.port.unwrap_or(settings.default_port);
    let lobby_name = options.name.unwrap_or_else(|| settings.lobby_name.clone());

    let host = LobbyHost::start(port, lobby_name, settings.max_players)
        .await
        .with_context(|| format!("Failed to start lobby on port {}", port))?;

    let public_address = options
        .public_address
        .unwrap_or_else(|| detect_lan_address().to_string());
    let code = host.room_code(&public_address);

    info!(address = %public_address, port = host.port(), "Lobby ready");
    println!("Room code: {}", code);
    println!("  ({}:{})", public_address, host.port());

    if options.copy {
        if copy_to_clipboard(code.as_str()) {
            println!("Copied to clipboard");
        } else {
            println!("Could not copy to clipboard");
        }
    }

    println!("Press Ctrl-C to close the lobby");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!(players = host.player_count().await, "Closing lobby");
    host.shutdown().await;
    Ok(())
}

/// Best guess at the address other machines on the network can reach.
///
/// Connecting a UDP socket sends nothing; it only asks the OS which local
/// interface would route to the given address.
fn detect_lan_address() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };

    match probe() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) | Err(_) => {
            warn!("Could not detect LAN address, using loopback");
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Copy text to clipboard with fallback for Wayland.
/// Returns true if successful, false if all methods failed.
fn copy_to_clipboard(text: &str) -> bool {
    if let Ok(mut clipboard) = arboard::Clipboard::new() {
        if clipboard.set_text(text).is_ok() {
            debug!("Copied to clipboard via arboard");
            return true;
        }
    }

    if try_wl_copy(text) {
        debug!("Copied to clipboard via wl-copy");
        return true;
    }

    warn!("All clipboard methods failed");
    false
}

/// Try to copy using wl-copy (Wayland clipboard tool).
fn try_wl_copy(text: &str) -> bool {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let Ok(mut child) = Command::new("wl-copy")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    else {
        return false;
    };

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(text.as_bytes()).is_err() {
            return false;
        }
    }

    matches!(child.wait(), Ok(status) if status.success())
}
