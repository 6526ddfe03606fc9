//! Lobby scheduler
//!
//! One cooperative pass classifies every lobby by state and performs the
//! per-class action, in a fixed order: delete, prepare, start, feedback,
//! advance, interrupt, interrupted-timeout, continue. A lobby therefore
//! advances at most one engine step per pass, leaving clients a network
//! round-trip between transitions.
//!
//! Every step snapshots the lobby under a read lock, commits its state
//! transition with a compare-and-set, then performs the socket sends with
//! no lock held. Committing first means a client reacting to the sent
//! frame can never observe the pre-transition state; a lobby flipped
//! mid-step (say, by a disconnect) fails the compare-and-set and keeps its
//! new state. A send failure after the commit fails the lobby.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::board::{Outcome, Side};
use crate::client::Client;
use crate::command::ServerMessage;
use crate::error::{GameError, NetError};
use crate::lobby::LobbyState;
use crate::registry::{LobbySnapshot, Registry};

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Game(#[from] GameError),
    #[error(transparent)]
    Net(#[from] NetError),
}

/// Run one scheduler pass over all lobbies.
pub async fn run_pass(registry: &Registry) {
    let classes = registry.classify().await;

    for id in &classes.to_delete {
        delete(registry, id).await;
    }
    for id in &classes.to_prepare {
        if let Err(e) = prepare(registry, id).await {
            warn!("Failed to prepare game in lobby \"{}\": {}", id, e);
            registry.fail_lobby(id).await;
        }
    }
    for id in &classes.to_start {
        start(registry, id).await;
    }
    for id in &classes.to_feedback {
        if let Err(e) = feedback(registry, id).await {
            warn!("Failed to inform players in lobby \"{}\": {}", id, e);
            registry.fail_lobby(id).await;
        }
    }
    for id in &classes.to_advance {
        if let Err(e) = advance(registry, id).await {
            warn!("Failed to advance game in lobby \"{}\": {}", id, e);
            registry.fail_lobby(id).await;
        }
    }
    for id in &classes.to_interrupt {
        if let Err(e) = interrupt(registry, id).await {
            warn!("Failed to pause lobby \"{}\": {}", id, e);
            registry.fail_lobby(id).await;
        }
    }
    for id in &classes.interrupted {
        if registry.expire_interrupt(id).await {
            info!("Reconnect window for lobby \"{}\" ran out", id);
        }
    }
    for id in &classes.to_continue {
        if let Err(e) = resume(registry, id).await {
            warn!("Failed to continue lobby \"{}\": {}", id, e);
            registry.fail_lobby(id).await;
        }
    }
}

/// Tear down a finished or failed lobby, TKOing whoever is still there.
async fn delete(registry: &Registry, lobby_id: &str) {
    for client in registry.delete_lobby(lobby_id).await {
        if let Err(e) = client.send(&ServerMessage::Tko).await {
            error!("Failed to send TKO message: {}", e);
        }
    }
}

/// Both players of the snapshot, or the error that fails the lobby.
async fn both_clients(
    registry: &Registry,
    snap: &LobbySnapshot,
) -> Result<(Arc<Client>, String, Arc<Client>, String), StepError> {
    let player02 = snap.player02.clone().ok_or(GameError::PlayerNotFound)?;

    let client01 = registry.client(&snap.player01).await.ok_or_else(|| {
        error!("Player 01 \"{}\" not found for lobby \"{}\"", snap.player01, snap.id);
        GameError::PlayerNotFound
    })?;
    let client02 = registry.client(&player02).await.ok_or_else(|| {
        error!("Player 02 \"{}\" not found for lobby \"{}\"", player02, snap.id);
        GameError::PlayerNotFound
    })?;

    Ok((client01, snap.player01.clone(), client02, player02))
}

/// Paired → announce the pairing to both players → Unready.
async fn prepare(registry: &Registry, lobby_id: &str) -> Result<(), StepError> {
    let Some(snap) = registry.snapshot(lobby_id).await else {
        return Ok(());
    };
    if snap.state != LobbyState::Paired {
        return Ok(());
    }

    let (client01, player01, client02, player02) = both_clients(registry, &snap).await?;

    if !registry
        .transition_if(lobby_id, LobbyState::Paired, LobbyState::Unready)
        .await
    {
        return Ok(());
    }

    client01
        .send(&ServerMessage::Paired { opponent: player02 })
        .await?;
    client02
        .send(&ServerMessage::Paired { opponent: player01 })
        .await?;
    Ok(())
}

/// Unready with both READYs in → generate the board and let the first
/// feedback pass hand player one the opening turn.
async fn start(registry: &Registry, lobby_id: &str) {
    match registry.start_game(lobby_id).await {
        Ok(board) => {
            debug!("Initial board for lobby \"{}\":\n{}", lobby_id, board.render());
        }
        Err(GameError::LobbyBadState) => {
            // the lobby moved on since classification
        }
        Err(e) => {
            warn!("Failed to start game in lobby \"{}\": {}", lobby_id, e);
            registry.fail_lobby(lobby_id).await;
        }
    }
}

/// Played → send each player their projection → the other side's turn.
async fn feedback(registry: &Registry, lobby_id: &str) -> Result<(), StepError> {
    let Some(snap) = registry.snapshot(lobby_id).await else {
        return Ok(());
    };
    let next = match snap.state {
        LobbyState::Player01Played => LobbyState::Player02Turn,
        LobbyState::Player02Played => LobbyState::Player01Turn,
        _ => return Ok(()),
    };

    let (client01, _, client02, _) = both_clients(registry, &snap).await?;

    if !registry.transition_if(lobby_id, snap.state, next).await {
        return Ok(());
    }

    let msg01 = ServerMessage::Board {
        projection: snap.board.projection(Side::One),
    };
    let msg02 = ServerMessage::Board {
        projection: snap.board.projection(Side::Two),
    };
    let (sent01, sent02) = tokio::join!(client01.send(&msg01), client02.send(&msg02),);
    sent01?;
    sent02?;
    Ok(())
}

/// Turn → either announce whose move it is, or close the game out with
/// WIN/LOST frames when a fleet is gone.
async fn advance(registry: &Registry, lobby_id: &str) -> Result<(), StepError> {
    let Some(snap) = registry.snapshot(lobby_id).await else {
        return Ok(());
    };
    let (on_turn_side, next) = match snap.state {
        LobbyState::Player01Turn => (Side::One, LobbyState::Player01Playing),
        LobbyState::Player02Turn => (Side::Two, LobbyState::Player02Playing),
        _ => return Ok(()),
    };

    let (client01, player01, client02, player02) = both_clients(registry, &snap).await?;

    match snap.board.outcome() {
        Outcome::Ongoing => {
            if !registry.transition_if(lobby_id, snap.state, next).await {
                return Ok(());
            }

            let on_turn = match on_turn_side {
                Side::One => player01,
                Side::Two => player02,
            };
            let msg01 = ServerMessage::Turn { player_on_turn: on_turn.clone() };
            let msg02 = ServerMessage::Turn { player_on_turn: on_turn };
            let (sent01, sent02) = tokio::join!(client01.send(&msg01), client02.send(&msg02),);
            sent01?;
            sent02?;
        }
        Outcome::Winner(side) => {
            if !registry
                .transition_if(lobby_id, snap.state, LobbyState::Finished)
                .await
            {
                return Ok(());
            }

            let (winner, loser) = match side {
                Side::One => (client01, client02),
                Side::Two => (client02, client01),
            };
            let (sent_win, sent_lost) = tokio::join!(
                winner.send(&ServerMessage::Win),
                loser.send(&ServerMessage::Lost),
            );
            sent_win?;
            sent_lost?;
        }
        Outcome::Draw => {
            // both fleets emptied on one move: nobody wins
            warn!("Game in lobby \"{}\" finished with a draw", lobby_id);
            if !registry
                .transition_if(lobby_id, snap.state, LobbyState::Finished)
                .await
            {
                return Ok(());
            }

            let (sent01, sent02) = tokio::join!(
                client01.send(&ServerMessage::Lost),
                client02.send(&ServerMessage::Lost),
            );
            sent01?;
            sent02?;
        }
    }

    Ok(())
}

/// Interrupt → tell the remaining player to WAIT → InterruptPending.
async fn interrupt(registry: &Registry, lobby_id: &str) -> Result<(), StepError> {
    let Some(snap) = registry.snapshot(lobby_id).await else {
        return Ok(());
    };
    if snap.state != LobbyState::Interrupt {
        return Ok(());
    }

    let missing = snap.missing_player.clone().ok_or(GameError::PlayerNotFound)?;
    let present = if snap.player01 != missing && !snap.player01.is_empty() {
        snap.player01.clone()
    } else {
        match &snap.player02 {
            Some(p) if *p != missing => p.clone(),
            _ => {
                error!("Missing player not found in lobby \"{}\"", lobby_id);
                return Err(GameError::PlayerNotFound.into());
            }
        }
    };

    let client = registry
        .client(&present)
        .await
        .ok_or(GameError::PlayerNotFound)?;

    if !registry
        .transition_if(lobby_id, LobbyState::Interrupt, LobbyState::InterruptPending)
        .await
    {
        return Ok(());
    }

    client.send(&ServerMessage::Wait).await?;
    Ok(())
}

/// Continue → replay the match context to both players → the turn state
/// the interrupt preserved.
async fn resume(registry: &Registry, lobby_id: &str) -> Result<(), StepError> {
    let Some(snap) = registry.snapshot(lobby_id).await else {
        return Ok(());
    };
    if snap.state != LobbyState::Continue {
        return Ok(());
    }

    let prior = snap.prior_state.ok_or(GameError::LobbyBadState)?;
    let side = prior.turn_side().ok_or(GameError::LobbyBadState)?;

    let (client01, player01, client02, player02) = both_clients(registry, &snap).await?;

    let (on_turn, next) = match side {
        Side::One => (player01.clone(), LobbyState::Player01Turn),
        Side::Two => (player02.clone(), LobbyState::Player02Turn),
    };

    if !registry.transition_if(lobby_id, LobbyState::Continue, next).await {
        return Ok(());
    }

    let msg01 = ServerMessage::Continue {
        lobby_id: snap.id.clone(),
        opponent: player02.clone(),
        player_on_turn: on_turn.clone(),
        projection: snap.board.projection(Side::One),
    };
    let msg02 = ServerMessage::Continue {
        lobby_id: snap.id.clone(),
        opponent: player01.clone(),
        player_on_turn: on_turn,
        projection: snap.board.projection(Side::Two),
    };
    let (sent01, sent02) = tokio::join!(client01.send(&msg01), client02.send(&msg02),);
    sent01?;
    sent02?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::{timeout, Duration};

    async fn authed(registry: &Registry, listener: &TcpListener, nickname: &str) -> TcpStream {
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, remote) = listener.accept().await.unwrap();
        let client = Client::new(stream, remote);
        let client_addr = client.addr();
        registry.add_pending(client).await;
        registry.authenticate(client_addr, nickname).await.unwrap();
        peer
    }

    async fn read_frame(peer: &mut TcpStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = timeout(Duration::from_secs(2), peer.read(&mut byte))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "peer closed while waiting for a frame");
            line.push(byte[0]);
            if byte[0] == b'\n' {
                return String::from_utf8(line).unwrap();
            }
        }
    }

    /// A lobby walks Paired → Unready → game start → boards → turn over
    /// consecutive passes, never advancing twice in one.
    #[tokio::test]
    async fn test_pass_sequence_from_pairing_to_first_turn() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let mut alice = authed(&registry, &listener, "alice").await;
        let mut bob = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry
            .transition_if("alice", LobbyState::Created, LobbyState::Waiting)
            .await;
        registry.join_lobby("bob", "alice").await.unwrap();
        registry
            .transition_if("alice", LobbyState::Waiting, LobbyState::Paired)
            .await;

        // pass 1: pairing announced
        run_pass(&registry).await;
        assert_eq!(read_frame(&mut alice).await, "IBGAME;PAIRED;bob\n");
        assert_eq!(read_frame(&mut bob).await, "IBGAME;PAIRED;alice\n");
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Unready)
        );

        registry.mark_ready("alice").await.unwrap();
        registry.mark_ready("bob").await.unwrap();

        // pass 2: board generated, no frames yet
        run_pass(&registry).await;
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Player02Played)
        );

        // pass 3: projections go out
        run_pass(&registry).await;
        assert!(read_frame(&mut alice).await.starts_with("IBGAME;BOARD;"));
        assert!(read_frame(&mut bob).await.starts_with("IBGAME;BOARD;"));
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Player01Turn)
        );

        // pass 4: player one gets the opening turn
        run_pass(&registry).await;
        assert_eq!(read_frame(&mut alice).await, "IBGAME;TURN;alice\n");
        assert_eq!(read_frame(&mut bob).await, "IBGAME;TURN;alice\n");
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Player01Playing)
        );
    }

    /// A finished board produces WIN/LOST and the lobby is deleted with
    /// TKO frames on the following pass.
    #[tokio::test]
    async fn test_finish_and_delete() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let mut alice = authed(&registry, &listener, "alice").await;
        let mut bob = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry
            .transition_if("alice", LobbyState::Created, LobbyState::Waiting)
            .await;
        registry.join_lobby("bob", "alice").await.unwrap();

        // the untouched board has no live ships on either side, the draw
        // case: both players are told they lost
        registry
            .transition_if("alice", LobbyState::Waiting, LobbyState::Player02Turn)
            .await;
        run_pass(&registry).await;
        assert_eq!(read_frame(&mut alice).await, "IBGAME;LOST\n");
        assert_eq!(read_frame(&mut bob).await, "IBGAME;LOST\n");
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Finished)
        );

        run_pass(&registry).await;
        assert_eq!(read_frame(&mut alice).await, "IBGAME;TKO\n");
        assert_eq!(read_frame(&mut bob).await, "IBGAME;TKO\n");
        assert!(registry.snapshot("alice").await.is_none());
        assert!(!registry.in_lobby("alice").await);
        assert!(!registry.in_lobby("bob").await);
    }

    /// The interrupt chain: WAIT to the present player, WAITING flips to
    /// Interrupted, a reattach flips to Continue, CONTINUE frames restore
    /// the prior turn.
    #[tokio::test]
    async fn test_interrupt_chain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let mut alice = authed(&registry, &listener, "alice").await;
        let mut bob = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry
            .transition_if("alice", LobbyState::Created, LobbyState::Waiting)
            .await;
        registry.join_lobby("bob", "alice").await.unwrap();
        registry
            .transition_if("alice", LobbyState::Waiting, LobbyState::Player01Playing)
            .await;

        registry.interrupt_or_fail("bob").await;

        run_pass(&registry).await;
        assert_eq!(read_frame(&mut alice).await, "IBGAME;WAIT\n");
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::InterruptPending)
        );

        registry.acknowledge_wait("alice").await.unwrap();
        assert!(registry.resume_if_interrupted("bob").await.unwrap());

        run_pass(&registry).await;
        let to_alice = read_frame(&mut alice).await;
        assert!(to_alice.starts_with("IBGAME;CONTINUE;alice;bob;alice;"));
        let to_bob = read_frame(&mut bob).await;
        assert!(to_bob.starts_with("IBGAME;CONTINUE;alice;alice;alice;"));
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Player01Turn)
        );
    }
}
