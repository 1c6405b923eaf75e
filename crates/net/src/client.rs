//! TCP transport for joining a lobby host
//!
//! `connect()` returns immediately; the connection runs on a tokio task and
//! reports back through [`TransportEvents`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use roomlink_core::config::{Settings, LOOPBACK_ADDRESS};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::frame::{read_frame, write_frame};
use crate::protocol::Message;
use crate::transport::{lock, DisconnectReason, Transport, TransportEvents};

/// Where the next connect goes
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    address: String,
    port: u16,
}

enum ClientCommand {
    Leave,
}

/// Live (or pending) connection owned by the transport
struct Connection {
    cmd_tx: mpsc::Sender<ClientCommand>,
}

/// Reports for one connection, dropped once a newer connect replaces it
#[derive(Clone)]
struct Reporter {
    events: TransportEvents,
    generation: u64,
    current: Arc<AtomicU64>,
}

impl Reporter {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn connected(&self) {
        if self.is_current() {
            self.events.emit_connected();
        }
    }

    fn disconnected(&self, reason: DisconnectReason) {
        if self.is_current() {
            self.events.emit_disconnected(reason);
        } else {
            debug!(generation = self.generation, reason = %reason, "Suppressing stale disconnect");
        }
    }
}

/// Lobby client speaking the framed lobby protocol over TCP
pub struct TcpTransport {
    target: Mutex<Target>,
    player_name: String,
    events: TransportEvents,
    generation: Arc<AtomicU64>,
    connection: Mutex<Option<Connection>>,
}

impl TcpTransport {
    pub fn new(default_port: u16, player_name: impl Into<String>) -> Self {
        Self {
            target: Mutex::new(Target {
                address: LOOPBACK_ADDRESS.to_string(),
                port: default_port,
            }),
            player_name: player_name.into(),
            events: TransportEvents::new(),
            generation: Arc::new(AtomicU64::new(0)),
            connection: Mutex::new(None),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.default_port, settings.player_name.clone())
    }

    pub fn target_address(&self) -> String {
        lock(&self.target).address.clone()
    }

    fn reporter(&self, generation: u64) -> Reporter {
        Reporter {
            events: self.events.clone(),
            generation,
            current: self.generation.clone(),
        }
    }
}

impl Transport for TcpTransport {
    fn set_target_address(&self, address: &str) {
        lock(&self.target).address = address.to_string();
    }

    fn set_target_port(&self, port: u16) {
        lock(&self.target).port = port;
    }

    fn target_port(&self) -> u16 {
        lock(&self.target).port
    }

    fn connect(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let reporter = self.reporter(generation);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("connect() called outside of a tokio runtime");
            reporter.disconnected(DisconnectReason::Error("no async runtime".into()));
            return;
        };

        let target = lock(&self.target).clone();
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        // Replacing the connection drops the old sender, which ends that task
        let previous = lock(&self.connection).replace(Connection { cmd_tx });
        if previous.is_some() {
            debug!("Replacing previous connection");
        }

        runtime.spawn(connection_task(
            target,
            self.player_name.clone(),
            reporter,
            cmd_rx,
        ));
    }

    fn disconnect(&self) {
        if let Some(connection) = lock(&self.connection).take() {
            let _ = connection.cmd_tx.try_send(ClientCommand::Leave);
        }
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        // Silence the running task; nobody is listening any more
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.disconnect();
    }
}

/// Runs one connection from connect to close and reports the outcome
async fn connection_task(
    target: Target,
    player_name: String,
    reporter: Reporter,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
) {
    info!(address = %target.address, port = target.port, "Connecting to lobby");

    let reason = match run_connection(&target, player_name, &reporter, &mut cmd_rx).await {
        Ok(()) => DisconnectReason::Closed,
        Err(reason) => reason,
    };

    info!(reason = %reason, "Disconnected from lobby");
    reporter.disconnected(reason);
}

async fn run_connection(
    target: &Target,
    player_name: String,
    reporter: &Reporter,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
) -> Result<(), DisconnectReason> {
    let stream = tokio::select! {
        result = TcpStream::connect((target.address.as_str(), target.port)) => {
            result.map_err(|e| DisconnectReason::Error(e.to_string()))?
        }
        _ = cmd_rx.recv() => {
            debug!("Connect abandoned");
            return Ok(());
        }
    };
    let (mut reader, mut writer) = tokio::io::split(stream);

    write_frame(&mut writer, &Message::Join { player_name })
        .await
        .map_err(into_reason)?;

    let reply = tokio::select! {
        result = read_frame(&mut reader) => result.map_err(into_reason)?,
        _ = cmd_rx.recv() => {
            let _ = write_frame(&mut writer, &Message::Leave).await;
            return Ok(());
        }
    };

    match reply {
        Message::Welcome {
            lobby_name,
            players,
        } => {
            info!(lobby = %lobby_name, players = players.len(), "Joined lobby");
            reporter.connected();
        }
        Message::Rejected { reason } => {
            warn!(reason = %reason, "Join rejected");
            return Err(DisconnectReason::Rejected(reason));
        }
        other => {
            return Err(DisconnectReason::Error(format!(
                "unexpected first message: {:?}",
                other
            )));
        }
    }

    session_loop(&mut reader, &mut writer, cmd_rx).await
}

/// Main loop once joined - incoming frames and outgoing commands
async fn session_loop(
    reader: &mut ReadHalf<TcpStream>,
    writer: &mut WriteHalf<TcpStream>,
    cmd_rx: &mut mpsc::Receiver<ClientCommand>,
) -> Result<(), DisconnectReason> {
    loop {
        tokio::select! {
            result = read_frame(reader) => {
                match result {
                    Ok(Message::Ping) => {
                        write_frame(writer, &Message::Pong).await.map_err(into_reason)?;
                    }
                    Ok(Message::PlayerList { players }) => {
                        debug!(players = ?players, "Player list updated");
                    }
                    Ok(Message::ServerShutdown) => {
                        info!("Lobby host shut down");
                        return Ok(());
                    }
                    Ok(other) => {
                        debug!(message = ?other, "Ignoring unexpected message");
                    }
                    Err(Error::ConnectionClosed) => {
                        debug!("Host closed connection");
                        return Ok(());
                    }
                    Err(e) => return Err(into_reason(e)),
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Leave) | None => {
                        debug!("Leave requested");
                        let _ = write_frame(writer, &Message::Leave).await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn into_reason(e: Error) -> DisconnectReason {
    match e {
        Error::ConnectionClosed => DisconnectReason::Closed,
        Error::Rejected(reason) => DisconnectReason::Rejected(reason),
        other => DisconnectReason::Error(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::LobbyHost;
    use crate::transport::ListenerHandle;
    use std::time::Duration;

    /// `None` = connected, `Some(reason)` = disconnected
    type Reports = mpsc::UnboundedReceiver<Option<DisconnectReason>>;

    fn watch(transport: &TcpTransport) -> (Reports, Vec<ListenerHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let on_connected = {
            let tx = tx.clone();
            transport.events().on_connected(move || {
                let _ = tx.send(None);
            })
        };
        let on_disconnected = transport.events().on_disconnected(move |reason| {
            let _ = tx.send(Some(reason.clone()));
        });
        (rx, vec![on_connected, on_disconnected])
    }

    async fn next(rx: &mut Reports) -> Option<DisconnectReason> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("transport event")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_connect_and_leave() {
        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let transport = TcpTransport::new(host.port(), "ana");
        let (mut rx, _handles) = watch(&transport);

        transport.connect();
        assert_eq!(next(&mut rx).await, None);

        transport.disconnect();
        assert_eq!(next(&mut rx).await, Some(DisconnectReason::Closed));
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejected_when_full() {
        let host = LobbyHost::start(0, "Tiny".to_string(), 1).await.unwrap();

        let first = TcpTransport::new(host.port(), "ana");
        let (mut first_rx, _h1) = watch(&first);
        first.connect();
        assert_eq!(next(&mut first_rx).await, None);

        let second = TcpTransport::new(host.port(), "ben");
        let (mut second_rx, _h2) = watch(&second);
        second.connect();
        assert_eq!(
            next(&mut second_rx).await,
            Some(DisconnectReason::Rejected("lobby full".to_string()))
        );
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_host_shutdown_disconnects() {
        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let transport = TcpTransport::new(host.port(), "ana");
        let (mut rx, _handles) = watch(&transport);

        transport.connect();
        assert_eq!(next(&mut rx).await, None);

        host.shutdown().await;
        assert_eq!(next(&mut rx).await, Some(DisconnectReason::Closed));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // Bind and drop to find a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = TcpTransport::new(port, "ana");
        let (mut rx, _handles) = watch(&transport);
        transport.connect();

        assert!(matches!(
            next(&mut rx).await,
            Some(DisconnectReason::Error(_))
        ));
    }

    #[tokio::test]
    async fn test_coordinator_joins_by_room_code() {
        use crate::coordinator::{
            ConnectionCoordinator, ConnectionState, CoordinatorEvent, CoordinatorSettings,
        };

        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let code = host.room_code("127.0.0.1");

        // Default port is deliberately wrong; the room code must override it
        let transport = Arc::new(TcpTransport::new(1, "ana"));
        let coordinator =
            ConnectionCoordinator::new(transport.clone(), CoordinatorSettings::default());
        let events = coordinator.subscribe();

        coordinator.submit(code.as_str()).unwrap();
        assert_eq!(transport.target_port(), host.port());

        let wait_for = |target: ConnectionState| {
            let mut events = events.resubscribe();
            async move {
                loop {
                    if let CoordinatorEvent::StateChanged(state) = events.recv().await.unwrap() {
                        if state == target {
                            return;
                        }
                    }
                }
            }
        };

        let connected = wait_for(ConnectionState::Connected);
        tokio::time::timeout(Duration::from_secs(5), connected)
            .await
            .expect("connected");
        assert_eq!(coordinator.state(), ConnectionState::Connected);

        let idle = wait_for(ConnectionState::Idle);
        host.shutdown().await;
        tokio::time::timeout(Duration::from_secs(5), idle)
            .await
            .expect("idle");
        assert_eq!(coordinator.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_connect_without_runtime_reports_failure() {
        let transport = TcpTransport::new(7777, "ana");
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let r = reasons.clone();
        let _handle = transport.events().on_disconnected(move |reason| {
            r.lock().unwrap().push(reason.clone());
        });

        transport.connect();
        assert_eq!(
            *reasons.lock().unwrap(),
            vec![DisconnectReason::Error("no async runtime".to_string())]
        );
    }

    #[test]
    fn test_target_setters() {
        let transport = TcpTransport::new(7777, "ana");
        assert_eq!(transport.target_address(), "127.0.0.1");
        assert_eq!(transport.target_port(), 7777);

        transport.set_target_address("10.0.0.4");
        transport.set_target_port(4000);
        assert_eq!(transport.target_address(), "10.0.0.4");
        assert_eq!(transport.target_port(), 4000);
    }
}
