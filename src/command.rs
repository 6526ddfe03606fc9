//! Protocol command definitions
//!
//! Typed representations of the bidirectional wire protocol: one enum per
//! direction, with parsing and validation for the inbound side and field
//! conversion for the outbound side.

use crate::board::{Pos, BOARD_SIZE};
use crate::codec;
use crate::error::ProtocolError;
use crate::protocol::{self, MAX_NICKNAME_LEN, NUM_DELIMITER};

/// Client → Server command
///
/// Every verb a client may legally send, with its validated parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Handshake request carrying the desired nickname
    Hand { nickname: String },
    /// Handshake confirmation
    Deal,
    /// Keep-alive probe
    Ping,
    /// Keep-alive reply
    Pong,
    /// Orderly disconnect request
    Leave,
    /// Request the list of joinable lobbies
    Lobbies,
    /// Create a lobby keyed by the sender's nickname
    Create,
    /// Join an existing lobby
    BringIt { lobby_id: String },
    /// Declare readiness for game start
    Ready,
    /// Play a move at the given position
    Action { pos: Pos },
    /// Acknowledge waiting for the opponent to reconnect
    Waiting,
}

impl ClientCommand {
    /// Parse a decoded field list into a command.
    ///
    /// Verifies the header, the verb, the arity, and the parameters. Verbs
    /// that exist on the wire but are never sent by clients are rejected as
    /// unknown.
    pub fn parse(fields: &[String]) -> Result<Self, ProtocolError> {
        if fields.len() < 2 {
            return Err(ProtocolError::BadHeader);
        }
        if fields[0] != protocol::MSG_HEADER {
            return Err(ProtocolError::BadHeader);
        }

        let verb = fields[1].as_str();
        if !protocol::is_known_verb(verb) {
            return Err(ProtocolError::UnknownVerb(verb.to_string()));
        }

        let params = &fields[2..];
        match verb {
            protocol::CMD_HANDSHAKE => {
                let nickname = expect_one(protocol::CMD_HANDSHAKE, params)?;
                validate_nickname(nickname)?;
                Ok(ClientCommand::Hand {
                    nickname: nickname.to_string(),
                })
            }
            protocol::CMD_HANDSHAKE_ACK => expect_none(protocol::CMD_HANDSHAKE_ACK, params, ClientCommand::Deal),
            protocol::CMD_PING => expect_none(protocol::CMD_PING, params, ClientCommand::Ping),
            protocol::CMD_PONG => expect_none(protocol::CMD_PONG, params, ClientCommand::Pong),
            protocol::CMD_LEAVE => expect_none(protocol::CMD_LEAVE, params, ClientCommand::Leave),
            protocol::CMD_LOBBIES => expect_none(protocol::CMD_LOBBIES, params, ClientCommand::Lobbies),
            protocol::CMD_CREATE_LOBBY => {
                expect_none(protocol::CMD_CREATE_LOBBY, params, ClientCommand::Create)
            }
            protocol::CMD_JOIN_LOBBY => {
                let lobby_id = expect_one(protocol::CMD_JOIN_LOBBY, params)?;
                if lobby_id.is_empty() {
                    return Err(ProtocolError::BadParam(protocol::CMD_JOIN_LOBBY, "empty lobby id"));
                }
                Ok(ClientCommand::BringIt {
                    lobby_id: lobby_id.to_string(),
                })
            }
            protocol::CMD_READY => expect_none(protocol::CMD_READY, params, ClientCommand::Ready),
            protocol::CMD_ACTION => {
                let raw = expect_one(protocol::CMD_ACTION, params)?;
                Ok(ClientCommand::Action {
                    pos: parse_position(raw)?,
                })
            }
            protocol::CMD_WAITING => expect_none(protocol::CMD_WAITING, params, ClientCommand::Waiting),
            // server-to-client verbs are not valid input
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }

    /// The wire verb of this command, for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            ClientCommand::Hand { .. } => protocol::CMD_HANDSHAKE,
            ClientCommand::Deal => protocol::CMD_HANDSHAKE_ACK,
            ClientCommand::Ping => protocol::CMD_PING,
            ClientCommand::Pong => protocol::CMD_PONG,
            ClientCommand::Leave => protocol::CMD_LEAVE,
            ClientCommand::Lobbies => protocol::CMD_LOBBIES,
            ClientCommand::Create => protocol::CMD_CREATE_LOBBY,
            ClientCommand::BringIt { .. } => protocol::CMD_JOIN_LOBBY,
            ClientCommand::Ready => protocol::CMD_READY,
            ClientCommand::Action { .. } => protocol::CMD_ACTION,
            ClientCommand::Waiting => protocol::CMD_WAITING,
        }
    }
}

/// Server → Client message
///
/// Every frame the server sends, with its carry-data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Handshake accepted
    Shake,
    /// Keep-alive probe
    Ping,
    /// Keep-alive reply
    Pong,
    /// Orderly disconnect acknowledgment
    Bye,
    /// Ids of all lobbies currently waiting for a second player
    Lobbies { ids: Vec<String> },
    /// Lobby created or joined
    Pairing { lobby_id: String },
    /// Both players are present; carries the opponent's nickname
    Paired { opponent: String },
    /// Whose turn it is
    Turn { player_on_turn: String },
    /// Board projection for the receiving player
    Board { projection: String },
    /// Game over, receiver won
    Win,
    /// Game over, receiver lost
    Lost,
    /// Lobby torn down
    Tko,
    /// Opponent disconnected; please hold
    Wait,
    /// Match resumes after a reconnect
    Continue {
        lobby_id: String,
        opponent: String,
        player_on_turn: String,
        projection: String,
    },
}

impl ServerMessage {
    /// The field list of this message, verb first.
    pub fn fields(&self) -> Vec<String> {
        match self {
            ServerMessage::Shake => vec![protocol::CMD_HANDSHAKE_RESP.to_string()],
            ServerMessage::Ping => vec![protocol::CMD_PING.to_string()],
            ServerMessage::Pong => vec![protocol::CMD_PONG.to_string()],
            ServerMessage::Bye => vec![protocol::CMD_LEAVE_ACK.to_string()],
            ServerMessage::Lobbies { ids } => {
                let mut fields = vec![protocol::CMD_LOBBIES.to_string()];
                fields.extend(ids.iter().cloned());
                fields
            }
            ServerMessage::Pairing { lobby_id } => {
                vec![protocol::CMD_CREATE_LOBBY_ACK.to_string(), lobby_id.clone()]
            }
            ServerMessage::Paired { opponent } => {
                vec![protocol::CMD_JOIN_LOBBY_ACK.to_string(), opponent.clone()]
            }
            ServerMessage::Turn { player_on_turn } => {
                vec![protocol::CMD_PLAYER_TURN.to_string(), player_on_turn.clone()]
            }
            ServerMessage::Board { projection } => {
                vec![protocol::CMD_BOARD.to_string(), projection.clone()]
            }
            ServerMessage::Win => vec![protocol::CMD_WIN.to_string()],
            ServerMessage::Lost => vec![protocol::CMD_LOSE.to_string()],
            ServerMessage::Tko => vec![protocol::CMD_TKO.to_string()],
            ServerMessage::Wait => vec![protocol::CMD_WAIT.to_string()],
            ServerMessage::Continue {
                lobby_id,
                opponent,
                player_on_turn,
                projection,
            } => vec![
                protocol::CMD_CONTINUE.to_string(),
                lobby_id.clone(),
                opponent.clone(),
                player_on_turn.clone(),
                projection.clone(),
            ],
        }
    }

    /// Encode this message into a complete wire frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        codec::encode(&self.fields())
    }
}

fn expect_none(
    verb: &'static str,
    params: &[String],
    cmd: ClientCommand,
) -> Result<ClientCommand, ProtocolError> {
    if params.is_empty() {
        Ok(cmd)
    } else {
        Err(ProtocolError::BadArity(verb))
    }
}

fn expect_one<'a>(verb: &'static str, params: &'a [String]) -> Result<&'a str, ProtocolError> {
    match params {
        [single] => Ok(single.as_str()),
        _ => Err(ProtocolError::BadArity(verb)),
    }
}

/// Validate a nickname: 1..=20 printable characters.
pub fn validate_nickname(nickname: &str) -> Result<(), ProtocolError> {
    if nickname.is_empty() {
        return Err(ProtocolError::BadParam(protocol::CMD_HANDSHAKE, "empty nickname"));
    }
    if nickname.chars().count() > MAX_NICKNAME_LEN {
        return Err(ProtocolError::BadParam(protocol::CMD_HANDSHAKE, "nickname too long"));
    }
    if nickname.chars().any(|c| c.is_control()) {
        return Err(ProtocolError::BadParam(
            protocol::CMD_HANDSHAKE,
            "non-printable character in nickname",
        ));
    }
    Ok(())
}

/// Parse a `row:col` position with both coordinates on the board.
fn parse_position(raw: &str) -> Result<Pos, ProtocolError> {
    let (row, col) = raw
        .split_once(NUM_DELIMITER)
        .ok_or(ProtocolError::BadParam(protocol::CMD_ACTION, "malformed position"))?;

    let row: usize = row
        .parse()
        .map_err(|_| ProtocolError::BadParam(protocol::CMD_ACTION, "malformed position"))?;
    let col: usize = col
        .parse()
        .map_err(|_| ProtocolError::BadParam(protocol::CMD_ACTION, "malformed position"))?;

    if row >= BOARD_SIZE || col >= BOARD_SIZE {
        return Err(ProtocolError::BadParam(protocol::CMD_ACTION, "position off the board"));
    }

    Ok(Pos { row, col })
}
