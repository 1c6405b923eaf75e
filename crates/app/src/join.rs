//! `roomlink join` - the join screen
//!
//! Each submitted line goes through the connection coordinator; coordinator
//! events are printed as they arrive.

use std::sync::Arc;

use anyhow::Result;
use roomlink_core::Settings;
use roomlink_net::{
    ConnectionCoordinator, ConnectionState, CoordinatorEvent, CoordinatorSettings, TcpTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::debug;

pub async fn run(
    settings: &Settings,
    code: Option<String>,
    player_name: Option<String>,
) -> Result<()> {
    let transport = match player_name {
        Some(name) => TcpTransport::new(settings.default_port, name),
        None => TcpTransport::from_settings(settings),
    };

    let coordinator = ConnectionCoordinator::new(
        Arc::new(transport),
        CoordinatorSettings::from(settings),
    );
    let events = coordinator.subscribe();
    let printer = tokio::spawn(print_events(events));

    match code {
        Some(code) => {
            submit(&coordinator, &code);
            // Stay until the connection ends or Ctrl-C
            let mut events = coordinator.subscribe();
            if coordinator.state() != ConnectionState::Idle {
                tokio::select! {
                    _ = wait_for_idle(&mut events) => {}
                    _ = tokio::signal::ctrl_c() => coordinator.disconnect(),
                }
            }
        }
        None => {
            println!("Enter a room code (or \"localhost\"), Ctrl-D to quit:");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                submit(&coordinator, &line);
            }
            coordinator.disconnect();
        }
    }

    drop(coordinator);
    printer.abort();
    Ok(())
}

fn submit(coordinator: &ConnectionCoordinator<TcpTransport>, text: &str) {
    match coordinator.submit(text) {
        Ok(address) => println!("Connecting to {}...", address),
        Err(e) => println!("Cannot join: {}", e),
    }
}

async fn wait_for_idle(events: &mut broadcast::Receiver<CoordinatorEvent>) {
    loop {
        match events.recv().await {
            Ok(CoordinatorEvent::StateChanged(ConnectionState::Idle)) => return,
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<CoordinatorEvent>) {
    loop {
        match events.recv().await {
            Ok(CoordinatorEvent::Connected(info)) => {
                println!("Connected to {}", info.address);
            }
            Ok(CoordinatorEvent::TransportFailure { reason, .. }) => {
                println!("Disconnected: {}", reason);
            }
            Ok(CoordinatorEvent::StateChanged(state)) => {
                debug!(state = ?state, "Connection state changed");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
