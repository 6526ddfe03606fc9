//! Error types for the match server
//!
//! Three focused enums: framing/validation errors, connection I/O errors,
//! and game/lobby rule violations. Uses thiserror for ergonomic definitions.

use thiserror::Error;

/// Framing and command-validation errors.
///
/// Produced by the codec while decoding a frame and by the command
/// validator while checking header, verb, arity, and parameters.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// No terminator found in the given input
    #[error("incomplete frame: no terminator")]
    IncompleteFrame,

    /// A non-printable character appeared before the terminator
    #[error("non-printable character in frame")]
    NonPrintable,

    /// A field to encode contains the frame terminator
    #[error("field contains the frame terminator")]
    FieldContainsTerminator,

    /// Field 0 is not the protocol header
    #[error("bad frame header")]
    BadHeader,

    /// The verb is not one the validator accepts
    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    /// Wrong number of fields for the verb
    #[error("bad arity for verb {0}")]
    BadArity(&'static str),

    /// A parameter failed validation (nickname, lobby id, position)
    #[error("bad parameter for verb {0}: {1}")]
    BadParam(&'static str, &'static str),
}

/// Connection I/O errors.
///
/// `Timeout` and `FrameTimeout` are retryable; `Eof` means the peer closed;
/// everything else is fatal for the connection.
#[derive(Debug, Error)]
pub enum NetError {
    /// A single read or accept hit its deadline with nothing pending
    #[error("read timed out")]
    Timeout,

    /// A partial frame did not complete within the whole-frame deadline
    #[error("client did not send a whole frame in time")]
    FrameTimeout,

    /// The peer closed the connection
    #[error("connection closed by peer")]
    Eof,

    /// A write to the peer failed
    #[error("failed to send message")]
    SendFailed,

    /// Unrecoverable socket error
    #[error("fatal connection error: {0}")]
    Fatal(#[from] std::io::Error),
}

impl NetError {
    /// Whether the caller may simply retry the read.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetError::Timeout | NetError::FrameTimeout)
    }
}

/// Session and lobby rule violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    /// Another authenticated client already holds the nickname
    #[error("nickname is already taken")]
    NicknameTaken,

    /// The handshake sequence was not followed
    #[error("handshake failed")]
    HandshakeFailed,

    /// No lobby with the given id
    #[error("lobby not found")]
    LobbyNotFound,

    /// Both player slots are occupied
    #[error("lobby is full")]
    LobbyFull,

    /// The verb requires the player to be outside any lobby
    #[error("player is not in idle state")]
    PlayerNotIdle,

    /// A lobby references a player the registry does not know
    #[error("player not found")]
    PlayerNotFound,

    /// A move arrived from the player not on turn
    #[error("not player's turn")]
    NotPlayerTurn,

    /// The move targets the player's own ship or a sunk cell
    #[error("invalid move")]
    InvalidMove,

    /// The lobby is not in a state that permits the operation
    #[error("lobby is not in the correct state")]
    LobbyBadState,
}
