//! Wire protocol vocabulary shared by the codec, validator, and session code.
//!
//! A frame on the wire is `IBGAME` followed by `;`-separated fields and a
//! trailing newline. The constants here are the single source of truth for
//! the framing characters, the verb strings, and the timeout table.

use std::time::Duration;

/// Frame header, field 0 of every frame.
pub const MSG_HEADER: &str = "IBGAME";

/// Field delimiter.
pub const MSG_DELIMITER: char = ';';

/// Frame terminator. Must never appear inside a field.
pub const MSG_TERMINATOR: char = '\n';

/// Escape character: `\;` is a literal delimiter, `\\` a literal backslash.
pub const MSG_ESCAPE: char = '\\';

/// Joins the two coordinates of a board position (`row:col`) and the cells
/// of a projected board row.
pub const NUM_DELIMITER: char = ':';

/// Joins the rows of a projected board.
pub const SEQ_DELIMITER: char = ',';

/// Verb strings, client to server.
pub const CMD_HANDSHAKE: &str = "HAND";
pub const CMD_HANDSHAKE_ACK: &str = "DEAL";
pub const CMD_PING: &str = "PING";
pub const CMD_PONG: &str = "PONG";
pub const CMD_LEAVE: &str = "LEAVE";
pub const CMD_LOBBIES: &str = "LOBBIES";
pub const CMD_CREATE_LOBBY: &str = "CREATE";
pub const CMD_JOIN_LOBBY: &str = "BRING_IT";
pub const CMD_READY: &str = "READY";
pub const CMD_ACTION: &str = "ACTION";
pub const CMD_WAITING: &str = "WAITING";

/// Verb strings, server to client.
pub const CMD_HANDSHAKE_RESP: &str = "SHAKE";
pub const CMD_LEAVE_ACK: &str = "BYE";
pub const CMD_CREATE_LOBBY_ACK: &str = "PAIRING";
pub const CMD_JOIN_LOBBY_ACK: &str = "PAIRED";
pub const CMD_PLAYER_TURN: &str = "TURN";
pub const CMD_TKO: &str = "TKO";
pub const CMD_BOARD: &str = "BOARD";
pub const CMD_WIN: &str = "WIN";
pub const CMD_LOSE: &str = "LOST";
pub const CMD_WAIT: &str = "WAIT";
pub const CMD_CONTINUE: &str = "CONTINUE";

/// Every verb that may legally appear in field 1 of a frame, in either
/// direction.
pub const KNOWN_VERBS: &[&str] = &[
    CMD_HANDSHAKE,
    CMD_HANDSHAKE_RESP,
    CMD_HANDSHAKE_ACK,
    CMD_PING,
    CMD_PONG,
    CMD_LEAVE,
    CMD_LEAVE_ACK,
    CMD_LOBBIES,
    CMD_CREATE_LOBBY,
    CMD_JOIN_LOBBY,
    CMD_CREATE_LOBBY_ACK,
    CMD_JOIN_LOBBY_ACK,
    CMD_READY,
    CMD_PLAYER_TURN,
    CMD_TKO,
    CMD_ACTION,
    CMD_BOARD,
    CMD_WIN,
    CMD_LOSE,
    CMD_WAIT,
    CMD_WAITING,
    CMD_CONTINUE,
];

/// Check whether a verb is part of the protocol at all.
pub fn is_known_verb(verb: &str) -> bool {
    KNOWN_VERBS.contains(&verb)
}

/// Maximum nickname length in characters.
pub const MAX_NICKNAME_LEN: usize = 20;

/// Players per lobby.
pub const PLAYER_COUNT: u8 = 2;

/// Wire read buffer; frames longer than this are refused on send.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Per-read socket deadline.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for assembling one complete frame out of partial reads.
pub const COMPLETE_MSG_TIMEOUT: Duration = Duration::from_secs(5);

/// Idle time after which the session probes the client with PING.
pub const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for a single accept attempt; the scheduler runs between attempts.
pub const ACCEPT_TIMEOUT: Duration = Duration::from_millis(100);

/// Window in which a disconnected player may reattach to their lobby.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_verbs() {
        assert!(is_known_verb("HAND"));
        assert!(is_known_verb("BRING_IT"));
        assert!(is_known_verb("CONTINUE"));
        assert!(!is_known_verb("FROBNICATE"));
        assert!(!is_known_verb("hand"));
    }
}
