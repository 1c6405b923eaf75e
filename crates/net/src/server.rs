//! TCP lobby host
//!
//! The player who creates a lobby runs this server and shares its room code.
//! Joining players connect, announce a name, and receive the player list.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use roomlink_core::room_code::{self, RoomCode};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::Message;

/// How long a closing connection may take to flush its queued messages
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Joined player
struct Player {
    name: String,
    tx: mpsc::Sender<Message>,
}

/// Lobby state shared across tasks
struct LobbyState {
    lobby_name: String,
    max_players: usize,
    /// Join order is preserved for the player list
    order: Vec<Uuid>,
    players: HashMap<Uuid, Player>,
}

impl LobbyState {
    fn player_names(&self) -> Vec<String> {
        self.order
            .iter()
            .filter_map(|id| self.players.get(id))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Lobby server handle
pub struct LobbyHost {
    addr: SocketAddr,
    state: Arc<RwLock<LobbyState>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LobbyHost {
    /// Start a lobby on the given port (0 picks a free port)
    pub async fn start(port: u16, lobby_name: String, max_players: usize) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, lobby = %lobby_name, max_players, "Lobby started");

        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(RwLock::new(LobbyState {
            lobby_name,
            max_players,
            order: Vec::new(),
            players: HashMap::new(),
        }));

        let state_clone = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(accept_loop(listener, state_clone, shutdown_rx));

        Ok(LobbyHost {
            addr: bound_addr,
            state,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Room code that points other players at this lobby.
    ///
    /// `public_host` is the address other players can reach, since the
    /// listener itself is bound to all interfaces.
    pub fn room_code(&self, public_host: &str) -> RoomCode {
        room_code::encode(public_host, self.port())
    }

    pub async fn players(&self) -> Vec<String> {
        self.state.read().await.player_names()
    }

    pub async fn player_count(&self) -> usize {
        self.state.read().await.players.len()
    }

    /// Tell every player the lobby is closing and stop accepting
    pub async fn shutdown(&self) {
        {
            let state = self.state.read().await;
            for player in state.players.values() {
                let _ = player.tx.send(Message::ServerShutdown).await;
            }
        }
        let _ = self.shutdown_tx.send(());
        info!("Lobby shutdown initiated");
    }
}

/// Accept incoming connections
async fn accept_loop(
    listener: TcpListener,
    state: Arc<RwLock<LobbyState>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let state = state.clone();
                        tokio::spawn(handle_connection(stream, addr, state));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Handle a single player connection
async fn handle_connection(stream: TcpStream, addr: SocketAddr, state: Arc<RwLock<LobbyState>>) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (msg_tx, msg_rx) = mpsc::channel(64);

    let player_id = match handle_join(&mut reader, &state, msg_tx.clone()).await {
        Ok(id) => id,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Join failed");
            if let Error::Rejected(reason) = e {
                let _ = write_frame(&mut writer, &Message::Rejected { reason }).await;
            }
            return;
        }
    };

    info!(addr = %addr, player_id = %player_id, "Player joined");

    let writer_handle = tokio::spawn(writer_task(writer, msg_rx));

    broadcast_player_list(&state, Some(player_id)).await;

    loop {
        match read_frame(&mut reader).await {
            Ok(Message::Ping) => {
                let _ = msg_tx.send(Message::Pong).await;
            }
            Ok(Message::Leave) => {
                debug!(player_id = %player_id, "Player left");
                break;
            }
            Ok(other) => {
                debug!(player_id = %player_id, message = ?other, "Ignoring unexpected message");
            }
            Err(Error::ConnectionClosed) => {
                debug!(player_id = %player_id, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(player_id = %player_id, error = %e, "Read error");
                break;
            }
        }
    }

    // Dropping every sender lets the writer drain and exit
    remove_player(&state, player_id).await;
    drop(msg_tx);
    if tokio::time::timeout(FLUSH_TIMEOUT, writer_handle).await.is_err() {
        debug!(player_id = %player_id, "Writer did not flush in time");
    }

    info!(player_id = %player_id, "Player disconnected");
}

/// Read the join message, register the player and queue its welcome
async fn handle_join(
    reader: &mut ReadHalf<TcpStream>,
    state: &Arc<RwLock<LobbyState>>,
    tx: mpsc::Sender<Message>,
) -> Result<Uuid> {
    match read_frame(reader).await? {
        Message::Join { player_name } => {
            let name = player_name.trim();
            if name.is_empty() {
                return Err(Error::Rejected("player name required".into()));
            }

            let mut s = state.write().await;
            if s.players.len() >= s.max_players {
                return Err(Error::Rejected("lobby full".into()));
            }

            let id = Uuid::new_v4();
            s.order.push(id);
            s.players.insert(
                id,
                Player {
                    name: name.to_string(),
                    tx: tx.clone(),
                },
            );

            // Queued under the lock so Welcome precedes any broadcast
            let welcome = Message::Welcome {
                lobby_name: s.lobby_name.clone(),
                players: s.player_names(),
            };
            if tx.try_send(welcome).is_err() {
                debug!(player_id = %id, "Failed to queue welcome");
            }
            Ok(id)
        }
        _ => Err(Error::Protocol("Expected Join".into())),
    }
}

/// Writer task - sends queued messages to the player
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

async fn remove_player(state: &Arc<RwLock<LobbyState>>, player_id: Uuid) {
    {
        let mut s = state.write().await;
        s.players.remove(&player_id);
        s.order.retain(|id| *id != player_id);
    }
    broadcast_player_list(state, None).await;
}

/// Send the current player list to everyone except `except`
async fn broadcast_player_list(state: &Arc<RwLock<LobbyState>>, except: Option<Uuid>) {
    let s = state.read().await;
    let msg = Message::PlayerList {
        players: s.player_names(),
    };
    for (id, player) in &s.players {
        if Some(*id) == except {
            continue;
        }
        if player.tx.send(msg.clone()).await.is_err() {
            debug!(player_id = %id, "Failed to queue message for player");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(addr: SocketAddr, name: &str) -> (ReadHalf<TcpStream>, WriteHalf<TcpStream>) {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, mut writer) = tokio::io::split(stream);
        write_frame(
            &mut writer,
            &Message::Join {
                player_name: name.to_string(),
            },
        )
        .await
        .unwrap();
        (reader, writer)
    }

    #[tokio::test]
    async fn test_join_receives_welcome() {
        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], host.port()));

        let (mut reader, _writer) = join(addr, "ana").await;
        match read_frame(&mut reader).await.unwrap() {
            Message::Welcome {
                lobby_name,
                players,
            } => {
                assert_eq!(lobby_name, "Test");
                assert_eq!(players, vec!["ana"]);
            }
            other => panic!("Expected Welcome, got {:?}", other),
        }

        assert_eq!(host.player_count().await, 1);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_lobby_rejects() {
        let host = LobbyHost::start(0, "Tiny".to_string(), 1).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], host.port()));

        let (mut first, _w1) = join(addr, "ana").await;
        assert!(matches!(
            read_frame(&mut first).await.unwrap(),
            Message::Welcome { .. }
        ));

        let (mut second, _w2) = join(addr, "ben").await;
        assert_eq!(
            read_frame(&mut second).await.unwrap(),
            Message::Rejected {
                reason: "lobby full".to_string()
            }
        );
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_ping_and_player_list() {
        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], host.port()));

        let (mut first, mut first_writer) = join(addr, "ana").await;
        read_frame(&mut first).await.unwrap();

        let (mut second, _w2) = join(addr, "ben").await;
        read_frame(&mut second).await.unwrap();

        assert_eq!(
            read_frame(&mut first).await.unwrap(),
            Message::PlayerList {
                players: vec!["ana".to_string(), "ben".to_string()]
            }
        );

        write_frame(&mut first_writer, &Message::Ping).await.unwrap();
        assert_eq!(read_frame(&mut first).await.unwrap(), Message::Pong);

        assert_eq!(host.players().await, vec!["ana", "ben"]);
        host.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_notifies_players() {
        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let addr = SocketAddr::from(([127, 0, 0, 1], host.port()));

        let (mut reader, _writer) = join(addr, "ana").await;
        read_frame(&mut reader).await.unwrap();

        host.shutdown().await;
        assert_eq!(
            read_frame(&mut reader).await.unwrap(),
            Message::ServerShutdown
        );
    }

    #[tokio::test]
    async fn test_room_code_points_at_lobby() {
        let host = LobbyHost::start(0, "Test".to_string(), 4).await.unwrap();
        let decoded = host.room_code("192.168.1.5").decode().unwrap();
        assert_eq!(decoded.host, "192.168.1.5");
        assert_eq!(decoded.port, host.port());
        host.shutdown().await;
    }
}
