//! Lobby struct definition
//!
//! A lobby is a two-player match container identified by its creator's
//! nickname, carrying the board and the state machine the scheduler drives.

use std::time::Instant;

use crate::board::{Board, Side};

/// The lobby state machine.
///
/// The scheduler advances engine-driven states once per pass; session
/// actors flip the command-driven ones (`Waiting` → joins, `Unready` →
/// READY, `*Playing` → ACTION, `InterruptPending` → WAITING).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyState {
    /// Created, acknowledgment not yet sent to the creator
    Created,
    /// One player in, discoverable via LOBBIES
    Waiting,
    /// Second player joined; scheduler will announce the pairing
    Paired,
    /// Both announced, waiting for two READYs
    Unready,
    /// Player one should receive a TURN message (or the game end)
    Player01Turn,
    /// Player one may send ACTION
    Player01Playing,
    /// Player one moved; boards must be projected to both
    Player01Played,
    /// Player two should receive a TURN message (or the game end)
    Player02Turn,
    /// Player two may send ACTION
    Player02Playing,
    /// Player two moved; boards must be projected to both
    Player02Played,
    /// A player vanished; the remaining player must be told to WAIT
    Interrupt,
    /// WAIT sent, awaiting the remaining player's WAITING
    InterruptPending,
    /// Holding for a reconnect within the window
    Interrupted,
    /// Missing player reattached; CONTINUE frames go out next pass
    Continue,
    /// Game ended normally
    Finished,
    /// Game ended unexpectedly
    Fail,
}

impl LobbyState {
    /// States in which an abrupt disconnect should pause the match rather
    /// than fail the lobby.
    pub fn is_live(self) -> bool {
        !matches!(
            self,
            LobbyState::Fail
                | LobbyState::Finished
                | LobbyState::Interrupt
                | LobbyState::InterruptPending
                | LobbyState::Interrupted
        )
    }

    /// States during which a freshly re-authenticated player should wait
    /// for the interrupt machinery to settle.
    pub fn is_reconnectable(self) -> bool {
        matches!(
            self,
            LobbyState::Interrupt | LobbyState::InterruptPending | LobbyState::Interrupted
        )
    }

    /// The side whose turn a prior-interrupt state belongs to, if any.
    pub fn turn_side(self) -> Option<Side> {
        match self {
            LobbyState::Player01Turn | LobbyState::Player01Playing | LobbyState::Player01Played => {
                Some(Side::One)
            }
            LobbyState::Player02Turn | LobbyState::Player02Playing | LobbyState::Player02Played => {
                Some(Side::Two)
            }
            _ => None,
        }
    }
}

/// A two-player match lobby.
#[derive(Debug)]
pub struct Lobby {
    /// Lobby id, equal to the creator's nickname for its whole lifetime
    pub id: String,
    /// Creator's nickname
    pub player01: String,
    /// Joined opponent (None while waiting)
    pub player02: Option<String>,
    /// Current state
    pub state: LobbyState,
    /// READYs received while `Unready`
    pub ready_count: u8,
    /// The match board; meaningful from game start on
    pub board: Board,
    /// When the current interrupt began
    pub interrupt_at: Option<Instant>,
    /// Nickname of the disconnected player during an interrupt
    pub missing_player: Option<String>,
    /// State the lobby was in when the interrupt hit, for the resume
    pub prior_state: Option<LobbyState>,
}

impl Lobby {
    /// Create a lobby for the given player; the id is their nickname.
    pub fn new(creator: &str) -> Self {
        Lobby {
            id: creator.to_string(),
            player01: creator.to_string(),
            player02: None,
            state: LobbyState::Created,
            ready_count: 0,
            board: Board::empty(),
            interrupt_at: None,
            missing_player: None,
            prior_state: None,
        }
    }

    /// Whether both slots are occupied.
    pub fn is_full(&self) -> bool {
        !self.player01.is_empty() && self.player02.is_some()
    }

    /// Whether the nickname occupies a slot.
    pub fn contains(&self, nickname: &str) -> bool {
        self.player01 == nickname || self.player02.as_deref() == Some(nickname)
    }

    /// Which side the nickname plays, if any.
    pub fn side_of(&self, nickname: &str) -> Option<Side> {
        if self.player01 == nickname {
            Some(Side::One)
        } else if self.player02.as_deref() == Some(nickname) {
            Some(Side::Two)
        } else {
            None
        }
    }

    /// The other player's nickname, if both are present.
    pub fn opponent_of(&self, nickname: &str) -> Option<&str> {
        if self.player01 == nickname {
            self.player02.as_deref()
        } else if self.player02.as_deref() == Some(nickname) {
            Some(self.player01.as_str())
        } else {
            None
        }
    }

    /// Clear the slot held by the nickname. Returns whether a slot changed.
    pub fn clear_slot(&mut self, nickname: &str) -> bool {
        if self.player01 == nickname {
            self.player01.clear();
            true
        } else if self.player02.as_deref() == Some(nickname) {
            self.player02 = None;
            true
        } else {
            false
        }
    }

    /// Nicknames currently occupying slots.
    pub fn players(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if !self.player01.is_empty() {
            out.push(self.player01.clone());
        }
        if let Some(p2) = &self.player02 {
            out.push(p2.clone());
        }
        out
    }
}
