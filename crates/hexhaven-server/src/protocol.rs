//! Wire protocol: client intents, server events, and payload validation.
//!
//! Messages are JSON objects `{"type": "...", "payload": {...}}`. Game
//! events from the engine already serialize in the same shape, so the
//! gateway forwards them untouched; everything else lives in
//! [`ServerMessage`].

use hexhaven_core::{GameEvent, GameState, PlayerColor, PlayerId, Resource, ResourceCount};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    /// Rebind this connection to a previously issued player identity.
    #[serde(rename = "session:resume")]
    ResumeSession { player_id: Uuid },

    #[serde(rename = "lobby:create")]
    LobbyCreate { username: String, max_players: u8 },

    #[serde(rename = "lobby:join")]
    LobbyJoin { code: String, username: String },

    #[serde(rename = "lobby:leave")]
    LobbyLeave,

    #[serde(rename = "lobby:ready")]
    LobbyReady { ready: bool },

    #[serde(rename = "lobby:set_color")]
    LobbySetColor { color: PlayerColor },

    #[serde(rename = "lobby:start_game")]
    LobbyStartGame,

    #[serde(rename = "lobby:list")]
    LobbyList,

    #[serde(rename = "game:roll_for_order")]
    RollForOrder,

    #[serde(rename = "game:roll_dice")]
    RollDice,

    #[serde(rename = "game:end_turn")]
    EndTurn,

    #[serde(rename = "game:request_state")]
    RequestState,

    #[serde(rename = "build:settlement")]
    BuildSettlement { vertex_id: String },

    #[serde(rename = "build:city")]
    BuildCity { vertex_id: String },

    #[serde(rename = "build:road")]
    BuildRoad { edge_id: String },

    #[serde(rename = "build:dev_card")]
    BuyDevCard,

    #[serde(rename = "robber:move")]
    RobberMove { hex_id: String },

    #[serde(rename = "robber:steal")]
    RobberSteal { victim: PlayerId },

    #[serde(rename = "robber:discard")]
    RobberDiscard { resources: ResourceCount },

    #[serde(rename = "trade:propose")]
    TradePropose {
        to: Option<PlayerId>,
        offering: ResourceCount,
        requesting: ResourceCount,
    },

    #[serde(rename = "trade:accept")]
    TradeAccept,

    #[serde(rename = "trade:reject")]
    TradeReject,

    #[serde(rename = "trade:cancel")]
    TradeCancel,

    #[serde(rename = "trade:bank")]
    TradeBank { give: Resource, receive: Resource },

    #[serde(rename = "trade:port")]
    TradePort { give: Resource, receive: Resource },

    #[serde(rename = "devcard:play_knight")]
    PlayKnight,

    #[serde(rename = "devcard:play_road_building")]
    PlayRoadBuilding,

    #[serde(rename = "devcard:play_year_of_plenty")]
    PlayYearOfPlenty { resources: (Resource, Resource) },

    #[serde(rename = "devcard:play_monopoly")]
    PlayMonopoly { resource: Resource },

    #[serde(rename = "chat:send")]
    ChatSend { message: String },

    #[serde(rename = "ping")]
    Ping,
}

impl ClientMessage {
    /// The intent family, used to pick the error event name.
    pub fn family(&self) -> MessageFamily {
        match self {
            ClientMessage::LobbyCreate { .. }
            | ClientMessage::LobbyJoin { .. }
            | ClientMessage::LobbyLeave
            | ClientMessage::LobbyReady { .. }
            | ClientMessage::LobbySetColor { .. }
            | ClientMessage::LobbyStartGame
            | ClientMessage::LobbyList => MessageFamily::Lobby,
            ClientMessage::BuildSettlement { .. }
            | ClientMessage::BuildCity { .. }
            | ClientMessage::BuildRoad { .. }
            | ClientMessage::BuyDevCard => MessageFamily::Build,
            ClientMessage::TradePropose { .. }
            | ClientMessage::TradeAccept
            | ClientMessage::TradeReject
            | ClientMessage::TradeCancel
            | ClientMessage::TradeBank { .. }
            | ClientMessage::TradePort { .. } => MessageFamily::Trade,
            _ => MessageFamily::Game,
        }
    }
}

/// Error-event routing for rejected intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFamily {
    Lobby,
    Build,
    Trade,
    Game,
}

/// Messages sent from server to client, beyond forwarded game events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// First message on every connection: the identity to resume with.
    #[serde(rename = "connection:established")]
    ConnectionEstablished { player_id: Uuid },

    #[serde(rename = "lobby:created")]
    LobbyCreated { lobby: LobbyInfo },

    #[serde(rename = "lobby:joined")]
    LobbyJoined { lobby: LobbyInfo },

    #[serde(rename = "lobby:updated")]
    LobbyUpdated { lobby: LobbyInfo },

    #[serde(rename = "lobby:left")]
    LobbyLeft,

    #[serde(rename = "lobby:countdown")]
    LobbyCountdown { seconds: u8 },

    #[serde(rename = "lobby:list")]
    LobbyList { lobbies: Vec<LobbyInfo> },

    #[serde(rename = "lobby:error")]
    LobbyError { code: String, message: String },

    #[serde(rename = "game:started")]
    GameStarted { code: String },

    #[serde(rename = "game:state")]
    GameSnapshot { state: Box<GameState> },

    #[serde(rename = "game:error")]
    GameError { code: String, message: String },

    #[serde(rename = "build:error")]
    BuildError { code: String, message: String },

    #[serde(rename = "trade:error")]
    TradeError { code: String, message: String },

    #[serde(rename = "chat:message")]
    ChatMessage {
        player_id: Uuid,
        username: String,
        message: String,
    },

    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    /// Build the `{code, message}` error event for an intent family.
    pub fn error_for(family: MessageFamily, code: &str, message: String) -> ServerMessage {
        let code = code.to_string();
        match family {
            MessageFamily::Lobby => ServerMessage::LobbyError { code, message },
            MessageFamily::Build => ServerMessage::BuildError { code, message },
            MessageFamily::Trade => ServerMessage::TradeError { code, message },
            MessageFamily::Game => ServerMessage::GameError { code, message },
        }
    }
}

/// Everything that can go down a connection: protocol messages and
/// forwarded engine events share the same `{"type", "payload"}` shape.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Server(ServerMessage),
    Event(GameEvent),
}

/// Lobby roster entry as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayerInfo {
    pub id: Uuid,
    pub username: String,
    pub color: PlayerColor,
    pub is_ready: bool,
    pub is_host: bool,
}

/// Lobby state as shown to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyInfo {
    pub code: String,
    pub host_id: Uuid,
    pub players: Vec<LobbyPlayerInfo>,
    pub max_players: u8,
    pub status: LobbyStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    Waiting,
    Starting,
    Started,
}

/// A rejected payload: stable code plus a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError {
    pub code: &'static str,
    pub message: String,
}

impl PayloadError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            code: "INVALID_PAYLOAD",
            message: message.into(),
        }
    }
}

/// 2-20 characters of `[A-Za-z0-9_-]`.
pub fn validate_username(username: &str) -> Result<(), PayloadError> {
    let ok_len = (2..=20).contains(&username.chars().count());
    let ok_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok_len && ok_chars {
        Ok(())
    } else {
        Err(PayloadError::invalid(
            "username must be 2-20 characters of letters, digits, '_' or '-'",
        ))
    }
}

/// Exactly 6 characters of `[A-Z0-9]`.
pub fn validate_code(code: &str) -> Result<(), PayloadError> {
    let ok = code.len() == 6
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    if ok {
        Ok(())
    } else {
        Err(PayloadError::invalid(
            "game code must be 6 characters of A-Z and 0-9",
        ))
    }
}

fn validate_chat(message: &str) -> Result<(), PayloadError> {
    if message.is_empty() || message.chars().count() > 500 {
        return Err(PayloadError::invalid("chat message must be 1-500 characters"));
    }
    Ok(())
}

/// Wire-level validation, run before an intent reaches any manager. ID
/// strings are parsed later (and rejected with `INVALID_ID`) when the
/// intent is mapped onto an engine action.
pub fn validate_message(msg: &ClientMessage) -> Result<(), PayloadError> {
    match msg {
        ClientMessage::LobbyCreate {
            username,
            max_players,
        } => {
            validate_username(username)?;
            if !(2..=4).contains(max_players) {
                return Err(PayloadError::invalid("max_players must be 2-4"));
            }
            Ok(())
        }
        ClientMessage::LobbyJoin { code, username } => {
            validate_code(code)?;
            validate_username(username)
        }
        ClientMessage::TradePropose {
            offering,
            requesting,
            ..
        } => {
            if offering.is_empty() || requesting.is_empty() {
                return Err(PayloadError::invalid(
                    "a trade needs resources on both sides",
                ));
            }
            Ok(())
        }
        ClientMessage::ChatSend { message } => validate_chat(message),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intents_round_trip_with_wire_names() {
        let msg = ClientMessage::BuildSettlement {
            vertex_id: "v_hex_0_0_hex_1_-1_hex_1_0".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"build:settlement\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, ClientMessage::BuildSettlement { .. }));
    }

    #[test]
    fn events_and_server_messages_share_the_envelope() {
        let event = GameEvent::RobberActivated { player: 1 };
        let out = serde_json::to_value(Outbound::Event(event)).unwrap();
        assert_eq!(out["type"], "robber:activated");

        let out = serde_json::to_value(Outbound::Server(ServerMessage::Pong)).unwrap();
        assert_eq!(out["type"], "pong");
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("ab").is_ok());
        assert!(validate_username("player_one-2").is_ok());
        assert!(validate_username("a").is_err());
        assert!(validate_username(&"x".repeat(21)).is_err());
        assert!(validate_username("spaced name").is_err());
        assert!(validate_username("émile").is_err());
    }

    #[test]
    fn code_rules() {
        assert!(validate_code("ABC234").is_ok());
        assert!(validate_code("abc234").is_err());
        assert!(validate_code("ABCDE").is_err());
        assert!(validate_code("ABC-34").is_err());
    }

    #[test]
    fn resource_counts_require_all_five_fields() {
        let json = r#"{"type":"robber:discard","payload":{"resources":{"brick":2,"lumber":2,"ore":0,"grain":0,"wool":0}}}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_ok());

        let missing = r#"{"type":"robber:discard","payload":{"resources":{"brick":2}}}"#;
        assert!(serde_json::from_str::<ClientMessage>(missing).is_err());

        let negative = r#"{"type":"robber:discard","payload":{"resources":{"brick":-1,"lumber":0,"ore":0,"grain":0,"wool":0}}}"#;
        assert!(serde_json::from_str::<ClientMessage>(negative).is_err());
    }

    #[test]
    fn trade_payload_must_be_two_sided() {
        let msg = ClientMessage::TradePropose {
            to: None,
            offering: ResourceCount::new(),
            requesting: ResourceCount::single(Resource::Ore, 1),
        };
        assert!(validate_message(&msg).is_err());
    }
}
