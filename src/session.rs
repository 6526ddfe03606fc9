//! Per-connection session actor
//!
//! One task per accepted connection: registers the client as pending, runs
//! the handshake, reattaches reconnecting players to their paused lobby,
//! then loops over keep-alive probing and verb dispatch until the peer
//! leaves, times out, or trips a protocol rule.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::client::{frame_is_verb, Client};
use crate::codec::{self, escape_for_log};
use crate::command::{ClientCommand, ServerMessage};
use crate::error::{GameError, NetError};
use crate::lobby::LobbyState;
use crate::protocol::{CMD_PONG, KEEP_ALIVE_TIMEOUT, RECONNECT_TIMEOUT};
use crate::registry::Registry;

/// How long one reconnect-wait slice parks before re-checking the lobby.
const RESUME_POLL_SLICE: Duration = Duration::from_millis(250);

/// Whether the connection survives the dispatched verb.
enum Flow {
    Stay,
    Disconnect,
}

/// What the read side produced this iteration.
enum ReadOutcome {
    Command(ClientCommand),
    Retry,
    Disconnect,
}

/// Drive one client connection from accept to teardown.
pub async fn handle_connection(registry: Arc<Registry>, stream: TcpStream, addr: SocketAddr) {
    debug!("Handling connection from {}", addr);

    let client = Client::new(stream, addr);
    registry.add_pending(Arc::clone(&client)).await;

    let nickname = match handshake(&registry, &client).await {
        Ok(nickname) => nickname,
        Err(e) => {
            warn!("Failed to validate connection from {}: {}", addr, e);
            registry.remove_pending(addr).await;
            client.close().await;
            info!("Client {} was disconnected", addr);
            return;
        }
    };

    // a nickname holding a paused lobby is a returning player
    if registry
        .lobby_state_of(&nickname)
        .await
        .is_some_and(|s| s.is_reconnectable())
    {
        await_resume(&registry, &nickname).await;
    }

    main_loop(&registry, &client, &nickname).await;

    teardown(&registry, &client, &nickname).await;
}

/// H1: read HAND, answer SHAKE, read DEAL, move the client into the
/// authenticated table. Any deviation closes the socket without a
/// diagnostic frame.
async fn handshake(registry: &Registry, client: &Client) -> Result<String, GameError> {
    let nickname = match read_command(client).await {
        Ok(ClientCommand::Hand { nickname }) => nickname,
        Ok(cmd) => {
            warn!("Expected HAND from {}, got {}", client.addr(), cmd.verb());
            return Err(GameError::HandshakeFailed);
        }
        Err(e) => {
            warn!("Failed to read handshake message from {}: {}", client.addr(), e);
            return Err(GameError::HandshakeFailed);
        }
    };

    if registry.nickname_taken(&nickname).await {
        return Err(GameError::NicknameTaken);
    }

    client
        .send(&ServerMessage::Shake)
        .await
        .map_err(|_| GameError::HandshakeFailed)?;

    match read_command(client).await {
        Ok(ClientCommand::Deal) => {}
        Ok(cmd) => {
            warn!("Expected DEAL from {}, got {}", client.addr(), cmd.verb());
            return Err(GameError::HandshakeFailed);
        }
        Err(e) => {
            warn!("Failed to read confirmation message from {}: {}", client.addr(), e);
            return Err(GameError::HandshakeFailed);
        }
    }

    registry.authenticate(client.addr(), &nickname).await?;
    Ok(nickname)
}

/// Read and parse one frame, folding framing and validation failures into
/// one error for the handshake path.
async fn read_command(client: &Client) -> Result<ClientCommand, GameError> {
    let raw = client.read_frame().await.map_err(|_| GameError::HandshakeFailed)?;
    codec::decode(&raw)
        .and_then(|fields| ClientCommand::parse(&fields))
        .map_err(|_| GameError::HandshakeFailed)
}

/// H2: hold a reconnecting player until the scheduler has walked their
/// lobby to `Interrupted`, then flip it to `Continue`. Bounded by the
/// reconnect window; woken early by the registry's resume signal.
async fn await_resume(registry: &Registry, nickname: &str) {
    info!("Client \"{}\" has reconnected", nickname);
    let deadline = Instant::now() + RECONNECT_TIMEOUT;

    loop {
        match registry.resume_if_interrupted(nickname).await {
            Ok(true) => {
                info!("Lobby of \"{}\" marked for continue", nickname);
                return;
            }
            Ok(false) => {}
            Err(_) => {
                error!("Lobby not found for reconnecting player \"{}\"", nickname);
                return;
            }
        }

        if Instant::now() >= deadline {
            warn!("Reconnect wait for \"{}\" ran out before the lobby settled", nickname);
            return;
        }

        registry.wait_resume_signal(RESUME_POLL_SLICE).await;
    }
}

/// H3: keep-alive probing and verb dispatch until something ends the
/// connection.
async fn main_loop(registry: &Registry, client: &Client, nickname: &str) {
    loop {
        if client.idle_for().await > KEEP_ALIVE_TIMEOUT && !check_alive(client).await {
            info!("Client {} is not alive", client.addr());
            break;
        }

        let cmd = match next_command(client).await {
            ReadOutcome::Command(cmd) => cmd,
            ReadOutcome::Retry => continue,
            ReadOutcome::Disconnect => break,
        };

        match dispatch(registry, client, nickname, cmd).await {
            Flow::Stay => {}
            Flow::Disconnect => break,
        }
    }
}

/// Probe an idle client with PING and insist on a PONG.
///
/// One application frame may race the probe; it is deferred back into the
/// residue and the read retried exactly once.
async fn check_alive(client: &Client) -> bool {
    if client.send(&ServerMessage::Ping).await.is_err() {
        return false;
    }

    let first = match client.read_frame().await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read pong response: {}", e);
            return false;
        }
    };
    if frame_is_verb(&first, CMD_PONG) {
        return true;
    }

    info!(
        "Another message received ({}), buffering it and awaiting pong",
        escape_for_log(&first)
    );
    let second = match client.read_frame().await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read pong response: {}", e);
            return false;
        }
    };
    client.push_back(&first).await;

    if frame_is_verb(&second, CMD_PONG) {
        true
    } else {
        warn!("Invalid pong reply: {}", escape_for_log(&second));
        false
    }
}

/// Read one frame in the main loop, classifying the result.
async fn next_command(client: &Client) -> ReadOutcome {
    let raw = match client.read_frame().await {
        Ok(raw) => raw,
        Err(e) if e.is_retryable() => return ReadOutcome::Retry,
        Err(NetError::Eof) => {
            warn!("Client {} disconnected abruptly", client.addr());
            return ReadOutcome::Disconnect;
        }
        Err(e) => {
            error!("Error reading from client {}: {}", client.addr(), e);
            return ReadOutcome::Disconnect;
        }
    };

    match codec::decode(&raw).and_then(|fields| ClientCommand::parse(&fields)) {
        Ok(cmd) => ReadOutcome::Command(cmd),
        Err(e) => {
            warn!("Invalid frame from {}: {}", client.addr(), e);
            ReadOutcome::Disconnect
        }
    }
}

/// Dispatch one authenticated-phase verb.
async fn dispatch(
    registry: &Registry,
    client: &Client,
    nickname: &str,
    cmd: ClientCommand,
) -> Flow {
    match cmd {
        ClientCommand::Ping => match client.send(&ServerMessage::Pong).await {
            Ok(()) => Flow::Stay,
            Err(_) => Flow::Disconnect,
        },
        ClientCommand::Leave => handle_leave(registry, client, nickname).await,
        ClientCommand::Lobbies => handle_lobbies(registry, client, nickname).await,
        ClientCommand::Create => handle_create(registry, client, nickname).await,
        ClientCommand::BringIt { lobby_id } => {
            handle_join(registry, client, nickname, &lobby_id).await
        }
        ClientCommand::Ready => handle_ready(registry, nickname).await,
        ClientCommand::Action { pos } => handle_action(registry, nickname, pos).await,
        ClientCommand::Waiting => handle_waiting(registry, nickname).await,
        // HAND, DEAL, and stray PONGs have no place after the handshake
        other => {
            warn!(
                "Unexpected command {} from authenticated client \"{}\"",
                other.verb(),
                nickname
            );
            Flow::Disconnect
        }
    }
}

async fn handle_leave(registry: &Registry, client: &Client, nickname: &str) -> Flow {
    info!("Client {} - \"{}\" has requested to leave", client.addr(), nickname);

    if client.send(&ServerMessage::Bye).await.is_err() {
        return Flow::Disconnect;
    }

    if registry.in_lobby(nickname).await {
        let _ = registry.kick_player(nickname).await;
    }
    Flow::Disconnect
}

async fn handle_lobbies(registry: &Registry, client: &Client, nickname: &str) -> Flow {
    if registry.in_lobby(nickname).await {
        warn!("Player \"{}\" asked for lobbies while in one", nickname);
        let _ = registry.kick_player(nickname).await;
        return Flow::Disconnect;
    }

    let ids = registry.waiting_lobby_ids().await;
    match client.send(&ServerMessage::Lobbies { ids }).await {
        Ok(()) => Flow::Stay,
        Err(e) => {
            error!("Failed to send lobby list: {}", e);
            Flow::Disconnect
        }
    }
}

async fn handle_create(registry: &Registry, client: &Client, nickname: &str) -> Flow {
    if registry.in_lobby(nickname).await {
        warn!("Player \"{}\" tried to create a lobby while in one", nickname);
        let _ = registry.kick_player(nickname).await;
        return Flow::Disconnect;
    }

    let lobby_id = match registry.create_lobby(nickname).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Failed to create lobby for \"{}\": {}", nickname, e);
            return Flow::Disconnect;
        }
    };

    if client
        .send(&ServerMessage::Pairing { lobby_id: lobby_id.clone() })
        .await
        .is_err()
    {
        error!("Failed to send create lobby acknowledgment to \"{}\"", nickname);
        registry.fail_lobby(&lobby_id).await;
        return Flow::Disconnect;
    }

    registry
        .transition_if(&lobby_id, LobbyState::Created, LobbyState::Waiting)
        .await;
    Flow::Stay
}

async fn handle_join(registry: &Registry, client: &Client, nickname: &str, lobby_id: &str) -> Flow {
    if registry.in_lobby(nickname).await {
        warn!("Player \"{}\" tried to join a lobby while in one", nickname);
        let _ = registry.kick_player(nickname).await;
        return Flow::Disconnect;
    }

    match registry.join_lobby(nickname, lobby_id).await {
        Ok(()) => {}
        Err(e @ (GameError::LobbyFull | GameError::LobbyBadState)) => {
            // joinable again later; the client may retry
            warn!("Player \"{}\" could not join lobby \"{}\": {}", nickname, lobby_id, e);
            return Flow::Stay;
        }
        Err(e) => {
            warn!("Player \"{}\" could not join lobby \"{}\": {}", nickname, lobby_id, e);
            return Flow::Disconnect;
        }
    }

    if client
        .send(&ServerMessage::Pairing { lobby_id: lobby_id.to_string() })
        .await
        .is_err()
    {
        error!("Failed to send join acknowledgment to \"{}\"", nickname);
        let _ = registry.kick_player(nickname).await;
        return Flow::Disconnect;
    }

    registry
        .transition_if(lobby_id, LobbyState::Waiting, LobbyState::Paired)
        .await;
    Flow::Stay
}

async fn handle_ready(registry: &Registry, nickname: &str) -> Flow {
    match registry.mark_ready(nickname).await {
        Ok(()) => Flow::Stay,
        Err(e) => {
            warn!("READY from \"{}\" rejected: {}", nickname, e);
            Flow::Disconnect
        }
    }
}

async fn handle_action(registry: &Registry, nickname: &str, pos: crate::board::Pos) -> Flow {
    let state = match registry.lobby_state_of(nickname).await {
        Some(state) => state,
        None => {
            warn!("ACTION from \"{}\" outside any lobby", nickname);
            return Flow::Disconnect;
        }
    };

    match state {
        LobbyState::Player01Playing | LobbyState::Player02Playing => {
            match registry.apply_move(nickname, pos).await {
                Ok(()) => Flow::Stay,
                Err(GameError::NotPlayerTurn) => {
                    warn!("Player \"{}\" moved out of turn", nickname);
                    Flow::Stay
                }
                Err(e) => {
                    warn!("Move by \"{}\" rejected: {}", nickname, e);
                    let _ = registry.kick_player(nickname).await;
                    Flow::Disconnect
                }
            }
        }
        LobbyState::Interrupt => {
            warn!("Player \"{}\" tried to make a move in an interrupted lobby", nickname);
            Flow::Stay
        }
        other => {
            error!(
                "ACTION from \"{}\" with lobby in invalid state {:?}",
                nickname, other
            );
            let _ = registry.kick_player(nickname).await;
            Flow::Disconnect
        }
    }
}

async fn handle_waiting(registry: &Registry, nickname: &str) -> Flow {
    match registry.acknowledge_wait(nickname).await {
        Ok(()) => Flow::Stay,
        Err(e) => {
            warn!("WAITING from \"{}\" rejected: {}", nickname, e);
            Flow::Disconnect
        }
    }
}

/// H4: pause or fail the lobby the player occupied, drop the authenticated
/// record, close the socket.
async fn teardown(registry: &Registry, client: &Client, nickname: &str) {
    registry.interrupt_or_fail(nickname).await;
    registry.remove_client(nickname).await;
    client.close().await;
    info!("Client {} - \"{}\" has disconnected", client.addr(), nickname);
}
