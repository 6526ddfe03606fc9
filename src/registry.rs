//! Shared connection and lobby tables
//!
//! Four maps guarded by a single read-write lock: pending connections by
//! remote address, authenticated clients by nickname, lobbies by id, and
//! the player→lobby index. Cross-table invariants only hold because every
//! mutation happens under one write lock; socket I/O never does.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::board::{Board, Pos, Side};
use crate::client::Client;
use crate::error::GameError;
use crate::lobby::{Lobby, LobbyState};
use crate::protocol::{PLAYER_COUNT, RECONNECT_TIMEOUT};

struct Tables {
    pending: HashMap<SocketAddr, Arc<Client>>,
    authenticated: HashMap<String, Arc<Client>>,
    lobbies: HashMap<String, Lobby>,
    player_lobby: HashMap<String, String>,
}

impl Tables {
    fn lobby_of_mut(&mut self, nickname: &str) -> Option<&mut Lobby> {
        let id = self.player_lobby.get(nickname)?.clone();
        self.lobbies.get_mut(&id)
    }

    /// Remove the player from their lobby's slot and the index, marking the
    /// lobby failed.
    fn kick(&mut self, nickname: &str) -> Result<(), GameError> {
        let Some(lobby_id) = self.player_lobby.get(nickname).cloned() else {
            warn!("Cannot kick \"{}\": player is not in a lobby", nickname);
            return Err(GameError::PlayerNotIdle);
        };

        let Some(lobby) = self.lobbies.get_mut(&lobby_id) else {
            self.player_lobby.remove(nickname);
            return Err(GameError::LobbyNotFound);
        };

        if !lobby.clear_slot(nickname) {
            warn!(
                "Cannot kick \"{}\" from lobby \"{}\": player holds no slot",
                nickname, lobby_id
            );
            return Err(GameError::PlayerNotFound);
        }

        lobby.state = LobbyState::Fail;
        self.player_lobby.remove(nickname);
        info!("Player \"{}\" has been kicked from lobby \"{}\"", nickname, lobby_id);
        Ok(())
    }
}

/// Lobby ids grouped by the action the scheduler owes them, one vector per
/// class in pass order.
#[derive(Debug, Default)]
pub struct LobbyClasses {
    pub to_delete: Vec<String>,
    pub to_prepare: Vec<String>,
    pub to_start: Vec<String>,
    pub to_feedback: Vec<String>,
    pub to_advance: Vec<String>,
    pub to_interrupt: Vec<String>,
    pub interrupted: Vec<String>,
    pub to_continue: Vec<String>,
}

/// Point-in-time copy of a lobby, taken under a read lock so the scheduler
/// can perform socket I/O without holding anything.
#[derive(Debug, Clone)]
pub struct LobbySnapshot {
    pub id: String,
    pub state: LobbyState,
    pub player01: String,
    pub player02: Option<String>,
    pub board: Board,
    pub missing_player: Option<String>,
    pub prior_state: Option<LobbyState>,
}

/// The shared registry.
///
/// Owns every `Client` and `Lobby`; session actors and the scheduler hold
/// `Arc<Registry>` and go through its methods, which scope the lock to the
/// map accesses.
pub struct Registry {
    inner: RwLock<Tables>,
    /// Signaled whenever a lobby reaches `Interrupted`, waking reconnect
    /// waits.
    resumed: Notify,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            inner: RwLock::new(Tables {
                pending: HashMap::new(),
                authenticated: HashMap::new(),
                lobbies: HashMap::new(),
                player_lobby: HashMap::new(),
            }),
            resumed: Notify::new(),
        }
    }

    // --- connection lifecycle -------------------------------------------

    /// Register a freshly accepted, unauthenticated connection.
    pub async fn add_pending(&self, client: Arc<Client>) {
        let addr = client.addr();
        self.inner.write().await.pending.insert(addr, client);
        info!("Client {} has been added to pending", addr);
    }

    /// Drop a pending connection that failed its handshake.
    pub async fn remove_pending(&self, addr: SocketAddr) {
        if self.inner.write().await.pending.remove(&addr).is_some() {
            info!("Client {} has been removed from pending", addr);
        }
    }

    /// Whether the nickname is already authenticated.
    pub async fn nickname_taken(&self, nickname: &str) -> bool {
        self.inner.read().await.authenticated.contains_key(nickname)
    }

    /// Atomically move a pending connection into the authenticated table.
    pub async fn authenticate(&self, addr: SocketAddr, nickname: &str) -> Result<(), GameError> {
        let mut tables = self.inner.write().await;
        if tables.authenticated.contains_key(nickname) {
            return Err(GameError::NicknameTaken);
        }
        let client = tables.pending.remove(&addr).ok_or(GameError::PlayerNotFound)?;
        tables.authenticated.insert(nickname.to_string(), client);
        info!("Client {} - \"{}\" has been authenticated", addr, nickname);
        Ok(())
    }

    /// Remove an authenticated client on teardown.
    pub async fn remove_client(&self, nickname: &str) {
        if self.inner.write().await.authenticated.remove(nickname).is_some() {
            info!("Client \"{}\" has been removed", nickname);
        }
    }

    /// Look up an authenticated client.
    pub async fn client(&self, nickname: &str) -> Option<Arc<Client>> {
        self.inner.read().await.authenticated.get(nickname).cloned()
    }

    // --- lobby membership -----------------------------------------------

    /// Whether the player currently occupies a lobby.
    pub async fn in_lobby(&self, nickname: &str) -> bool {
        self.inner.read().await.player_lobby.contains_key(nickname)
    }

    /// The state of the player's lobby, if they are in one.
    pub async fn lobby_state_of(&self, nickname: &str) -> Option<LobbyState> {
        let tables = self.inner.read().await;
        let id = tables.player_lobby.get(nickname)?;
        tables.lobbies.get(id).map(|l| l.state)
    }

    /// Ids of all lobbies open for a second player.
    pub async fn waiting_lobby_ids(&self) -> Vec<String> {
        self.inner
            .read()
            .await
            .lobbies
            .values()
            .filter(|l| l.state == LobbyState::Waiting)
            .map(|l| l.id.clone())
            .collect()
    }

    /// Create a lobby keyed by the creator's nickname.
    ///
    /// Refuses while a dying lobby still occupies the id; clobbering it
    /// would orphan the old lobby's index entries.
    pub async fn create_lobby(&self, nickname: &str) -> Result<String, GameError> {
        let mut tables = self.inner.write().await;
        if tables.player_lobby.contains_key(nickname) {
            return Err(GameError::PlayerNotIdle);
        }
        if tables.lobbies.contains_key(nickname) {
            warn!("Lobby id \"{}\" is still occupied by an old lobby", nickname);
            return Err(GameError::LobbyBadState);
        }

        let lobby = Lobby::new(nickname);
        let id = lobby.id.clone();
        tables.lobbies.insert(id.clone(), lobby);
        tables.player_lobby.insert(nickname.to_string(), id.clone());
        info!("Player \"{}\" created lobby \"{}\"", nickname, id);
        Ok(id)
    }

    /// Add a player to a waiting lobby's free slot.
    pub async fn join_lobby(&self, nickname: &str, lobby_id: &str) -> Result<(), GameError> {
        let mut tables = self.inner.write().await;
        if tables.player_lobby.contains_key(nickname) {
            return Err(GameError::PlayerNotIdle);
        }

        let lobby = tables.lobbies.get_mut(lobby_id).ok_or(GameError::LobbyNotFound)?;
        if lobby.is_full() {
            return Err(GameError::LobbyFull);
        }
        if lobby.state != LobbyState::Waiting {
            return Err(GameError::LobbyBadState);
        }

        if lobby.player01.is_empty() {
            lobby.player01 = nickname.to_string();
        } else {
            lobby.player02 = Some(nickname.to_string());
        }
        tables.player_lobby.insert(nickname.to_string(), lobby_id.to_string());
        info!("Player \"{}\" has been added to lobby \"{}\"", nickname, lobby_id);
        Ok(())
    }

    /// Kick a player out of their lobby, failing the lobby.
    pub async fn kick_player(&self, nickname: &str) -> Result<(), GameError> {
        self.inner.write().await.kick(nickname)
    }

    /// Count a READY from the player.
    pub async fn mark_ready(&self, nickname: &str) -> Result<(), GameError> {
        let mut tables = self.inner.write().await;
        let lobby = tables.lobby_of_mut(nickname).ok_or(GameError::PlayerNotIdle)?;
        if lobby.state != LobbyState::Unready || lobby.ready_count >= PLAYER_COUNT {
            return Err(GameError::LobbyBadState);
        }
        lobby.ready_count += 1;
        Ok(())
    }

    /// Resolve a move for the player, advancing the lobby to the matching
    /// "played" state. The whole check-and-mutate runs under one write
    /// lock, so a refused move is invisible to every other task.
    pub async fn apply_move(&self, nickname: &str, pos: Pos) -> Result<(), GameError> {
        let mut tables = self.inner.write().await;
        let lobby = tables.lobby_of_mut(nickname).ok_or(GameError::PlayerNotIdle)?;

        let side = match lobby.state {
            LobbyState::Player01Playing => Side::One,
            LobbyState::Player02Playing => Side::Two,
            _ => return Err(GameError::LobbyBadState),
        };
        if lobby.side_of(nickname) != Some(side) {
            return Err(GameError::NotPlayerTurn);
        }

        lobby.board.apply_move(side, pos)?;
        lobby.state = match side {
            Side::One => LobbyState::Player01Played,
            Side::Two => LobbyState::Player02Played,
        };
        debug!("Player \"{}\" made a move in lobby \"{}\"", nickname, lobby.id);
        Ok(())
    }

    /// Record the present player's WAITING acknowledgment.
    pub async fn acknowledge_wait(&self, nickname: &str) -> Result<(), GameError> {
        let mut tables = self.inner.write().await;
        let lobby = tables.lobby_of_mut(nickname).ok_or(GameError::LobbyNotFound)?;
        if lobby.state != LobbyState::InterruptPending {
            return Err(GameError::LobbyBadState);
        }
        lobby.state = LobbyState::Interrupted;
        drop(tables);
        self.resumed.notify_waiters();
        Ok(())
    }

    /// Attach a re-authenticated player back onto their interrupted lobby.
    ///
    /// Returns true when the lobby was flipped to `Continue`, false when it
    /// has not reached `Interrupted` yet.
    pub async fn resume_if_interrupted(&self, nickname: &str) -> Result<bool, GameError> {
        let mut tables = self.inner.write().await;
        let lobby = tables.lobby_of_mut(nickname).ok_or(GameError::LobbyNotFound)?;
        if lobby.state != LobbyState::Interrupted {
            return Ok(false);
        }
        lobby.missing_player = None;
        lobby.state = LobbyState::Continue;
        Ok(true)
    }

    /// Park the caller until a lobby reaches `Interrupted` or the wait
    /// slice elapses.
    pub async fn wait_resume_signal(&self, slice: Duration) {
        let _ = tokio::time::timeout(slice, self.resumed.notified()).await;
    }

    /// Teardown bookkeeping for a vanished player: pause a live lobby for a
    /// reconnect, fail any other.
    pub async fn interrupt_or_fail(&self, nickname: &str) {
        let mut tables = self.inner.write().await;
        let Some(lobby) = tables.lobby_of_mut(nickname) else {
            return;
        };

        if lobby.state.is_live() {
            info!(
                "Player \"{}\" disconnected from live lobby \"{}\"; pausing for reconnect",
                nickname, lobby.id
            );
            lobby.prior_state = Some(lobby.state);
            lobby.state = LobbyState::Interrupt;
            lobby.missing_player = Some(nickname.to_string());
            lobby.interrupt_at = Some(Instant::now());
        } else {
            info!(
                "Player \"{}\" disconnected from lobby \"{}\"; marking it for deletion",
                nickname, lobby.id
            );
            lobby.state = LobbyState::Fail;
        }
    }

    // --- scheduler support ----------------------------------------------

    /// Group every lobby by the scheduler action it needs.
    pub async fn classify(&self) -> LobbyClasses {
        let tables = self.inner.read().await;
        let mut classes = LobbyClasses::default();

        for lobby in tables.lobbies.values() {
            match lobby.state {
                LobbyState::Fail | LobbyState::Finished => classes.to_delete.push(lobby.id.clone()),
                LobbyState::Paired => classes.to_prepare.push(lobby.id.clone()),
                LobbyState::Unready if lobby.ready_count == PLAYER_COUNT => {
                    classes.to_start.push(lobby.id.clone())
                }
                LobbyState::Player01Played | LobbyState::Player02Played => {
                    classes.to_feedback.push(lobby.id.clone())
                }
                LobbyState::Player01Turn | LobbyState::Player02Turn => {
                    classes.to_advance.push(lobby.id.clone())
                }
                LobbyState::Interrupt => classes.to_interrupt.push(lobby.id.clone()),
                LobbyState::Interrupted => classes.interrupted.push(lobby.id.clone()),
                LobbyState::Continue => classes.to_continue.push(lobby.id.clone()),
                _ => {}
            }
        }

        classes
    }

    /// Copy of a lobby for lock-free I/O.
    pub async fn snapshot(&self, lobby_id: &str) -> Option<LobbySnapshot> {
        let tables = self.inner.read().await;
        let lobby = tables.lobbies.get(lobby_id)?;
        Some(LobbySnapshot {
            id: lobby.id.clone(),
            state: lobby.state,
            player01: lobby.player01.clone(),
            player02: lobby.player02.clone(),
            board: lobby.board.clone(),
            missing_player: lobby.missing_player.clone(),
            prior_state: lobby.prior_state,
        })
    }

    /// Commit a state transition only if the lobby still is where the
    /// caller last saw it. Returns whether the transition happened.
    pub async fn transition_if(&self, lobby_id: &str, expected: LobbyState, next: LobbyState) -> bool {
        let mut tables = self.inner.write().await;
        match tables.lobbies.get_mut(lobby_id) {
            Some(lobby) if lobby.state == expected => {
                lobby.state = next;
                true
            }
            _ => false,
        }
    }

    /// Force a lobby into the failed state.
    pub async fn fail_lobby(&self, lobby_id: &str) {
        if let Some(lobby) = self.inner.write().await.lobbies.get_mut(lobby_id) {
            lobby.state = LobbyState::Fail;
        }
    }

    /// Initialize the board and put the lobby into the state that makes the
    /// first scheduler pass deal boards and give player one the turn.
    pub async fn start_game(&self, lobby_id: &str) -> Result<Board, GameError> {
        let mut tables = self.inner.write().await;

        let both_present = {
            let lobby = tables.lobbies.get(lobby_id).ok_or(GameError::LobbyNotFound)?;
            if lobby.state != LobbyState::Unready || lobby.ready_count != PLAYER_COUNT {
                return Err(GameError::LobbyBadState);
            }
            let p2 = lobby.player02.clone().ok_or(GameError::PlayerNotFound)?;
            tables.authenticated.contains_key(&lobby.player01)
                && tables.authenticated.contains_key(&p2)
        };
        if !both_present {
            return Err(GameError::PlayerNotFound);
        }

        let lobby = tables.lobbies.get_mut(lobby_id).ok_or(GameError::LobbyNotFound)?;
        lobby.board = Board::generate();
        lobby.state = LobbyState::Player02Played;
        lobby.ready_count = 0;
        Ok(lobby.board.clone())
    }

    /// Expire an interrupted lobby whose reconnect window ran out: only the
    /// missing player is removed; the lobby fails and the next delete pass
    /// TKOs whoever remains.
    pub async fn expire_interrupt(&self, lobby_id: &str) -> bool {
        let mut tables = self.inner.write().await;

        let missing = {
            let Some(lobby) = tables.lobbies.get(lobby_id) else {
                return false;
            };
            if lobby.state != LobbyState::Interrupted {
                return false;
            }
            let expired = lobby
                .interrupt_at
                .map(|t| t.elapsed() > RECONNECT_TIMEOUT)
                .unwrap_or(true);
            if !expired {
                return false;
            }

            lobby.missing_player.clone().or_else(|| {
                // fall back to deriving the absent side from the auth table
                lobby
                    .players()
                    .into_iter()
                    .find(|p| !tables.authenticated.contains_key(p))
            })
        };

        match missing {
            Some(nickname) => {
                let _ = tables.kick(&nickname);
                true
            }
            None => {
                warn!("Interrupted lobby \"{}\" has no missing player on record", lobby_id);
                if let Some(lobby) = tables.lobbies.get_mut(lobby_id) {
                    lobby.state = LobbyState::Fail;
                }
                true
            }
        }
    }

    /// Tear a lobby down, unlinking both players.
    ///
    /// Returns the remaining connected players so the caller can send TKO
    /// after the lock is gone.
    pub async fn delete_lobby(&self, lobby_id: &str) -> Vec<Arc<Client>> {
        let mut tables = self.inner.write().await;
        let Some(lobby) = tables.lobbies.remove(lobby_id) else {
            return Vec::new();
        };

        let mut to_notify = Vec::new();
        for player in lobby.players() {
            tables.player_lobby.remove(&player);
            if let Some(client) = tables.authenticated.get(&player) {
                debug!("Removing player \"{}\" from lobby \"{}\"", player, lobby_id);
                to_notify.push(Arc::clone(client));
            }
        }

        info!("Lobby \"{}\" has been deleted", lobby_id);
        to_notify
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;
    use tokio::net::{TcpListener, TcpStream};

    // keep the peer stream alive so no teardown races the assertions
    async fn test_client(listener: &TcpListener) -> (Arc<Client>, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).await.unwrap();
        let (stream, remote) = listener.accept().await.unwrap();
        (Client::new(stream, remote), peer)
    }

    async fn authed(registry: &Registry, listener: &TcpListener, nickname: &str) -> TcpStream {
        let (client, peer) = test_client(listener).await;
        let addr = client.addr();
        registry.add_pending(client).await;
        registry.authenticate(addr, nickname).await.unwrap();
        peer
    }

    async fn assert_invariants(registry: &Registry) {
        let tables = registry.inner.read().await;

        // every index entry points at a lobby that holds the player
        for (player, lobby_id) in &tables.player_lobby {
            let lobby = tables
                .lobbies
                .get(lobby_id)
                .unwrap_or_else(|| panic!("index references missing lobby {}", lobby_id));
            assert!(
                lobby.contains(player),
                "index maps {} to lobby {} without a slot",
                player,
                lobby_id
            );
        }

        // every occupied slot is indexed back to its lobby
        for lobby in tables.lobbies.values() {
            for player in lobby.players() {
                assert_eq!(
                    tables.player_lobby.get(&player),
                    Some(&lobby.id),
                    "slot holder {} is not indexed to lobby {}",
                    player,
                    lobby.id
                );
            }
        }
    }

    #[tokio::test]
    async fn test_authenticate_moves_pending_to_auth() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();

        let (client, _peer) = test_client(&listener).await;
        let addr = client.addr();
        registry.add_pending(client).await;

        assert!(!registry.nickname_taken("alice").await);
        registry.authenticate(addr, "alice").await.unwrap();
        assert!(registry.nickname_taken("alice").await);
        assert!(registry.client("alice").await.is_some());

        // pending entry is gone
        assert!(registry.inner.read().await.pending.is_empty());
    }

    #[tokio::test]
    async fn test_authenticate_rejects_taken_nickname() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _peer1 = authed(&registry, &listener, "alice").await;

        let (client, _peer2) = test_client(&listener).await;
        let addr = client.addr();
        registry.add_pending(client).await;

        let result = registry.authenticate(addr, "alice").await;
        assert_eq!(result, Err(GameError::NicknameTaken));
        // the loser stays pending for its own cleanup
        assert_eq!(registry.inner.read().await.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_lobby_create_join_flow() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _p1 = authed(&registry, &listener, "alice").await;
        let _p2 = authed(&registry, &listener, "bob").await;

        let id = registry.create_lobby("alice").await.unwrap();
        assert_eq!(id, "alice");
        assert!(registry.in_lobby("alice").await);
        assert_eq!(registry.create_lobby("alice").await, Err(GameError::PlayerNotIdle));

        // not discoverable until the creator's PAIRING went out
        assert!(registry.waiting_lobby_ids().await.is_empty());
        assert!(registry.transition_if("alice", LobbyState::Created, LobbyState::Waiting).await);
        assert_eq!(registry.waiting_lobby_ids().await, vec!["alice".to_string()]);

        assert_eq!(
            registry.join_lobby("bob", "nosuch").await,
            Err(GameError::LobbyNotFound)
        );
        registry.join_lobby("bob", "alice").await.unwrap();
        assert!(registry.in_lobby("bob").await);

        let _p3 = authed(&registry, &listener, "carol").await;
        assert_eq!(
            registry.join_lobby("carol", "alice").await,
            Err(GameError::LobbyFull)
        );

        assert_invariants(&registry).await;
    }

    #[tokio::test]
    async fn test_kick_fails_lobby_and_unlinks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _p1 = authed(&registry, &listener, "alice").await;
        let _p2 = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry.transition_if("alice", LobbyState::Created, LobbyState::Waiting).await;
        registry.join_lobby("bob", "alice").await.unwrap();

        registry.kick_player("bob").await.unwrap();
        assert!(!registry.in_lobby("bob").await);
        assert_eq!(registry.lobby_state_of("alice").await, Some(LobbyState::Fail));
        assert_invariants(&registry).await;

        assert_eq!(registry.kick_player("bob").await, Err(GameError::PlayerNotIdle));
    }

    #[tokio::test]
    async fn test_delete_lobby_returns_remaining_players() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _p1 = authed(&registry, &listener, "alice").await;
        let _p2 = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry.transition_if("alice", LobbyState::Created, LobbyState::Waiting).await;
        registry.join_lobby("bob", "alice").await.unwrap();

        let notified = registry.delete_lobby("alice").await;
        assert_eq!(notified.len(), 2);
        assert!(!registry.in_lobby("alice").await);
        assert!(!registry.in_lobby("bob").await);
        assert!(registry.snapshot("alice").await.is_none());
        assert_invariants(&registry).await;
    }

    #[tokio::test]
    async fn test_ready_gate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _p1 = authed(&registry, &listener, "alice").await;
        let _p2 = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry.transition_if("alice", LobbyState::Created, LobbyState::Waiting).await;
        registry.join_lobby("bob", "alice").await.unwrap();

        // READY only counts while the lobby is unready
        assert_eq!(registry.mark_ready("alice").await, Err(GameError::LobbyBadState));

        registry.transition_if("alice", LobbyState::Waiting, LobbyState::Paired).await;
        registry.transition_if("alice", LobbyState::Paired, LobbyState::Unready).await;
        registry.mark_ready("alice").await.unwrap();
        registry.mark_ready("bob").await.unwrap();

        let classes = registry.classify().await;
        assert_eq!(classes.to_start, vec!["alice".to_string()]);

        let board = registry.start_game("alice").await.unwrap();
        assert_eq!(board.live_cells(), crate::board::BOAT_CELLS);
        assert_eq!(
            registry.lobby_state_of("alice").await,
            Some(LobbyState::Player02Played)
        );
    }

    #[tokio::test]
    async fn test_interrupt_and_resume() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _p1 = authed(&registry, &listener, "alice").await;
        let _p2 = authed(&registry, &listener, "bob").await;

        registry.create_lobby("alice").await.unwrap();
        registry.transition_if("alice", LobbyState::Created, LobbyState::Waiting).await;
        registry.join_lobby("bob", "alice").await.unwrap();
        registry.transition_if("alice", LobbyState::Waiting, LobbyState::Player01Playing).await;

        // bob vanishes mid-game
        registry.interrupt_or_fail("bob").await;
        let snap = registry.snapshot("alice").await.unwrap();
        assert_eq!(snap.state, LobbyState::Interrupt);
        assert_eq!(snap.missing_player.as_deref(), Some("bob"));
        assert_eq!(snap.prior_state, Some(LobbyState::Player01Playing));

        // WAITING is only valid once WAIT went out
        assert_eq!(registry.acknowledge_wait("alice").await, Err(GameError::LobbyBadState));
        registry
            .transition_if("alice", LobbyState::Interrupt, LobbyState::InterruptPending)
            .await;
        registry.acknowledge_wait("alice").await.unwrap();

        assert!(registry.resume_if_interrupted("bob").await.unwrap());
        let snap = registry.snapshot("alice").await.unwrap();
        assert_eq!(snap.state, LobbyState::Continue);
        assert!(snap.missing_player.is_none());
    }

    #[tokio::test]
    async fn test_teardown_fails_non_live_lobby() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let _p1 = authed(&registry, &listener, "alice").await;

        registry.create_lobby("alice").await.unwrap();
        registry.transition_if("alice", LobbyState::Created, LobbyState::Waiting).await;
        registry.transition_if("alice", LobbyState::Waiting, LobbyState::Interrupted).await;

        registry.interrupt_or_fail("alice").await;
        assert_eq!(registry.lobby_state_of("alice").await, Some(LobbyState::Fail));
    }

    #[tokio::test]
    async fn test_randomized_operations_keep_invariants() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = Registry::new();
        let mut rng = rand::thread_rng();

        let names: Vec<String> = (0..8).map(|i| format!("player{}", i)).collect();
        let mut peers = Vec::new();

        for _ in 0..300 {
            let name = names.choose(&mut rng).unwrap().clone();
            match rng.gen_range(0..5) {
                0 => {
                    if !registry.nickname_taken(&name).await {
                        peers.push(authed(&registry, &listener, &name).await);
                    }
                }
                1 => {
                    if registry.nickname_taken(&name).await {
                        if registry.create_lobby(&name).await.is_ok() {
                            registry
                                .transition_if(&name, LobbyState::Created, LobbyState::Waiting)
                                .await;
                        }
                    }
                }
                2 => {
                    let target = names.choose(&mut rng).unwrap();
                    if registry.nickname_taken(&name).await {
                        let _ = registry.join_lobby(&name, target).await;
                    }
                }
                3 => {
                    let _ = registry.kick_player(&name).await;
                }
                _ => {
                    let target = names.choose(&mut rng).unwrap();
                    registry.delete_lobby(target).await;
                }
            }

            assert_invariants(&registry).await;
        }
    }
}
