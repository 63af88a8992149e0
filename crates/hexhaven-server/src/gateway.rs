//! Websocket gateway: decodes client intents, routes them to lobbies or
//! game actors, and fans events and snapshots back out.
//!
//! A connection is issued a fresh player identity on accept; clients store
//! it and rebind with `session:resume` after a drop. Game errors never
//! close a connection — they go back to the submitter as `{code, message}`
//! events.

use crate::lobby::{LobbyError, LobbyManager};
use crate::protocol::{
    validate_message, ClientMessage, LobbyInfo, MessageFamily, Outbound, ServerMessage,
};
use crate::session::{GameHandle, GameUpdate, SessionManager};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use hexhaven_core::{EdgeId, GameAction, HexId, PlayerColor, VertexId};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Shared gateway state.
pub struct Gateway {
    pub sessions: SessionManager,
    pub lobbies: LobbyManager,
    connections: DashMap<Uuid, mpsc::UnboundedSender<Outbound>>,
    usernames: DashMap<Uuid, String>,
    countdown: Duration,
    subscriber_buffer: usize,
}

impl Gateway {
    pub fn new(
        sessions: SessionManager,
        lobbies: LobbyManager,
        countdown: Duration,
        subscriber_buffer: usize,
    ) -> Self {
        Self {
            sessions,
            lobbies,
            connections: DashMap::new(),
            usernames: DashMap::new(),
            countdown,
            subscriber_buffer,
        }
    }

    fn send(&self, player: Uuid, msg: Outbound) {
        if let Some(tx) = self.connections.get(&player) {
            let _ = tx.send(msg);
        }
    }

    fn send_server(&self, player: Uuid, msg: ServerMessage) {
        self.send(player, Outbound::Server(msg));
    }

    fn broadcast_lobby(&self, lobby: &LobbyInfo, msg: ServerMessage) {
        for p in &lobby.players {
            self.send_server(p.id, msg.clone());
        }
    }

    fn send_error(&self, player: Uuid, family: MessageFamily, code: &str, message: String) {
        self.send_server(player, ServerMessage::error_for(family, code, message));
    }

    fn send_lobby_error(&self, player: Uuid, err: &LobbyError) {
        self.send_error(player, MessageFamily::Lobby, err.code(), err.to_string());
    }
}

/// Accept loop. One task per connection.
pub async fn run(addr: SocketAddr, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("hexhaven server listening on {addr}");

    while let Ok((stream, peer)) = listener.accept().await {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, gateway).await {
                error!(%peer, "connection error: {e}");
            }
        });
    }
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    gw: Arc<Gateway>,
) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    info!(%peer, "new websocket connection");
    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut player_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    gw.connections.insert(player_id, tx.clone());
    let _ = tx.send(Outbound::Server(ServerMessage::ConnectionEstablished {
        player_id,
    }));

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if ws_tx.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(intent) => {
                    if let Err(invalid) = validate_message(&intent) {
                        gw.send_error(player_id, intent.family(), invalid.code, invalid.message);
                        continue;
                    }
                    handle_message(&gw, &mut player_id, &tx, intent).await;
                }
                Err(e) => {
                    warn!(%player_id, "undecodable message: {e}");
                    gw.send_error(
                        player_id,
                        MessageFamily::Game,
                        "INVALID_PAYLOAD",
                        "could not decode message".into(),
                    );
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) => {
                gw.send_server(player_id, ServerMessage::Pong);
            }
            Err(e) => {
                warn!(%player_id, "websocket error: {e}");
                break;
            }
            _ => {}
        }
    }

    handle_disconnect(&gw, player_id);
    gw.connections.remove(&player_id);
    writer.abort();
    info!(%player_id, "connection closed");
    Ok(())
}

/// Subscribe a player's connection to their game and bridge the update
/// stream onto the connection channel.
async fn subscribe_to_game(gw: &Arc<Gateway>, player: Uuid, handle: &GameHandle) {
    let (sink, mut updates) = mpsc::channel(gw.subscriber_buffer);
    match handle.subscribe(player, sink).await {
        Ok(snapshot) => {
            gw.send_server(player, ServerMessage::GameSnapshot { state: snapshot });
            let gw = Arc::clone(gw);
            tokio::spawn(async move {
                while let Some(update) = updates.recv().await {
                    match update {
                        GameUpdate::Events(events) => {
                            for event in events {
                                gw.send(player, Outbound::Event(event));
                            }
                        }
                        GameUpdate::Snapshot(state) => {
                            gw.send_server(player, ServerMessage::GameSnapshot { state });
                        }
                    }
                }
            });
        }
        Err(e) => {
            gw.send_error(player, MessageFamily::Game, e.code(), e.to_string());
        }
    }
}

/// Route one validated intent.
async fn handle_message(
    gw: &Arc<Gateway>,
    player_id: &mut Uuid,
    tx: &mpsc::UnboundedSender<Outbound>,
    intent: ClientMessage,
) {
    let player = *player_id;
    match intent {
        // ---- session ----
        ClientMessage::ResumeSession { player_id: resume } => {
            gw.connections.remove(&player);
            gw.connections.insert(resume, tx.clone());
            *player_id = resume;
            info!(%player, %resume, "connection rebound to existing identity");

            if let Some(handle) = gw.sessions.handle_for(&resume) {
                subscribe_to_game(gw, resume, &handle).await;
            } else if let Some(code) = gw.lobbies.lobby_code_of(resume) {
                if let Some(lobby) = gw.lobbies.info_of(&code) {
                    gw.send_server(resume, ServerMessage::LobbyJoined { lobby });
                }
            }
        }

        // ---- lobby ----
        ClientMessage::LobbyCreate {
            username,
            max_players,
        } => {
            gw.usernames.insert(player, username.clone());
            let lobby = gw.lobbies.create(player, username, max_players);
            gw.send_server(player, ServerMessage::LobbyCreated { lobby });
        }

        ClientMessage::LobbyJoin { code, username } => {
            match gw.lobbies.join(&code, player, username.clone()) {
                Ok(lobby) => {
                    gw.usernames.insert(player, username);
                    gw.send_server(
                        player,
                        ServerMessage::LobbyJoined {
                            lobby: lobby.clone(),
                        },
                    );
                    for p in lobby.players.iter().filter(|p| p.id != player) {
                        gw.send_server(
                            p.id,
                            ServerMessage::LobbyUpdated {
                                lobby: lobby.clone(),
                            },
                        );
                    }
                }
                Err(e) => gw.send_lobby_error(player, &e),
            }
        }

        ClientMessage::LobbyLeave => {
            if let Some((_, remaining)) = gw.lobbies.leave(player) {
                gw.send_server(player, ServerMessage::LobbyLeft);
                if let Some(lobby) = remaining {
                    gw.broadcast_lobby(&lobby, ServerMessage::LobbyUpdated { lobby: lobby.clone() });
                }
            } else {
                gw.send_lobby_error(player, &LobbyError::NotInLobby);
            }
        }

        ClientMessage::LobbyReady { ready } => match gw.lobbies.set_ready(player, ready) {
            Ok(lobby) => {
                gw.broadcast_lobby(&lobby, ServerMessage::LobbyUpdated { lobby: lobby.clone() })
            }
            Err(e) => gw.send_lobby_error(player, &e),
        },

        ClientMessage::LobbySetColor { color } => match gw.lobbies.set_color(player, color) {
            Ok(lobby) => {
                gw.broadcast_lobby(&lobby, ServerMessage::LobbyUpdated { lobby: lobby.clone() })
            }
            Err(e) => gw.send_lobby_error(player, &e),
        },

        ClientMessage::LobbyList => {
            let lobbies = gw.lobbies.list_waiting();
            gw.send_server(player, ServerMessage::LobbyList { lobbies });
        }

        ClientMessage::LobbyStartGame => match gw.lobbies.begin_start(player) {
            Ok(lobby) => {
                gw.broadcast_lobby(&lobby, ServerMessage::LobbyCountdown { seconds: 3 });
                let gw = Arc::clone(gw);
                let code = lobby.code.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(gw.countdown).await;
                    let Some(lobby) = gw.lobbies.take_started(&code) else {
                        return;
                    };
                    let roster: Vec<(Uuid, String, PlayerColor)> = lobby
                        .players
                        .iter()
                        .map(|p| (p.id, p.username.clone(), p.color))
                        .collect();
                    let handle = gw.sessions.create_game(code.clone(), roster);
                    for p in &lobby.players {
                        gw.send_server(p.id, ServerMessage::GameStarted { code: code.clone() });
                        subscribe_to_game(&gw, p.id, &handle).await;
                    }
                });
            }
            Err(e) => gw.send_lobby_error(player, &e),
        },

        // ---- game ----
        ClientMessage::RollForOrder => {
            submit(gw, player, MessageFamily::Game, GameAction::RollForOrder).await;
        }
        ClientMessage::RollDice => {
            submit(gw, player, MessageFamily::Game, GameAction::RollDice).await;
        }
        ClientMessage::EndTurn => {
            submit(gw, player, MessageFamily::Game, GameAction::EndTurn).await;
        }
        ClientMessage::RequestState => match gw.sessions.handle_for(&player) {
            Some(handle) => {
                if let Some(state) = handle.snapshot().await {
                    gw.send_server(player, ServerMessage::GameSnapshot { state });
                }
            }
            None => {
                gw.send_error(
                    player,
                    MessageFamily::Game,
                    "NOT_IN_GAME",
                    "you are not in a game".into(),
                );
            }
        },

        // ---- building ----
        ClientMessage::BuildSettlement { vertex_id } => {
            if let Some(vertex) = parse_id::<VertexId>(gw, player, MessageFamily::Build, &vertex_id)
            {
                submit(gw, player, MessageFamily::Build, GameAction::BuildSettlement(vertex)).await;
            }
        }
        ClientMessage::BuildCity { vertex_id } => {
            if let Some(vertex) = parse_id::<VertexId>(gw, player, MessageFamily::Build, &vertex_id)
            {
                submit(gw, player, MessageFamily::Build, GameAction::BuildCity(vertex)).await;
            }
        }
        ClientMessage::BuildRoad { edge_id } => {
            if let Some(edge) = parse_id::<EdgeId>(gw, player, MessageFamily::Build, &edge_id) {
                submit(gw, player, MessageFamily::Build, GameAction::BuildRoad(edge)).await;
            }
        }
        ClientMessage::BuyDevCard => {
            submit(gw, player, MessageFamily::Build, GameAction::BuyDevCard).await;
        }

        // ---- robber ----
        ClientMessage::RobberMove { hex_id } => {
            if let Some(hex) = parse_id::<HexId>(gw, player, MessageFamily::Game, &hex_id) {
                submit(gw, player, MessageFamily::Game, GameAction::MoveRobber(hex)).await;
            }
        }
        ClientMessage::RobberSteal { victim } => {
            submit(
                gw,
                player,
                MessageFamily::Game,
                GameAction::StealResource { victim },
            )
            .await;
        }
        ClientMessage::RobberDiscard { resources } => {
            submit(
                gw,
                player,
                MessageFamily::Game,
                GameAction::DiscardResources(resources),
            )
            .await;
        }

        // ---- trading ----
        ClientMessage::TradePropose {
            to,
            offering,
            requesting,
        } => {
            submit(
                gw,
                player,
                MessageFamily::Trade,
                GameAction::ProposeTrade {
                    to,
                    offering,
                    requesting,
                },
            )
            .await;
        }
        ClientMessage::TradeAccept => {
            submit(gw, player, MessageFamily::Trade, GameAction::AcceptTrade).await;
        }
        ClientMessage::TradeReject => {
            submit(gw, player, MessageFamily::Trade, GameAction::RejectTrade).await;
        }
        ClientMessage::TradeCancel => {
            submit(gw, player, MessageFamily::Trade, GameAction::CancelTrade).await;
        }
        ClientMessage::TradeBank { give, receive } | ClientMessage::TradePort { give, receive } => {
            submit(
                gw,
                player,
                MessageFamily::Trade,
                GameAction::HarborTrade { give, receive },
            )
            .await;
        }

        // ---- development cards ----
        ClientMessage::PlayKnight => {
            submit(gw, player, MessageFamily::Game, GameAction::PlayKnight).await;
        }
        ClientMessage::PlayRoadBuilding => {
            submit(gw, player, MessageFamily::Game, GameAction::PlayRoadBuilding).await;
        }
        ClientMessage::PlayYearOfPlenty { resources } => {
            submit(
                gw,
                player,
                MessageFamily::Game,
                GameAction::PlayYearOfPlenty(resources.0, resources.1),
            )
            .await;
        }
        ClientMessage::PlayMonopoly { resource } => {
            submit(gw, player, MessageFamily::Game, GameAction::PlayMonopoly(resource)).await;
        }

        // ---- chat ----
        ClientMessage::ChatSend { message } => {
            let username = gw
                .usernames
                .get(&player)
                .map(|u| u.clone())
                .unwrap_or_else(|| "player".to_string());
            let chat = ServerMessage::ChatMessage {
                player_id: player,
                username,
                message,
            };
            if let Some(code) = gw.sessions.game_code_of(&player) {
                for member in gw.sessions.members_of(&code) {
                    gw.send_server(member, chat.clone());
                }
            } else if let Some(code) = gw.lobbies.lobby_code_of(player) {
                if let Some(lobby) = gw.lobbies.info_of(&code) {
                    gw.broadcast_lobby(&lobby, chat);
                }
            }
        }

        ClientMessage::Ping => {
            gw.send_server(player, ServerMessage::Pong);
        }
    }
}

/// Parse a wire ID or report `INVALID_ID` to the submitter.
fn parse_id<T: FromStr>(
    gw: &Gateway,
    player: Uuid,
    family: MessageFamily,
    raw: &str,
) -> Option<T> {
    match raw.parse::<T>() {
        Ok(id) => Some(id),
        Err(_) => {
            gw.send_error(player, family, "INVALID_ID", format!("invalid id: {raw}"));
            None
        }
    }
}

/// Route an engine action to the player's game actor. Rejections come
/// back only to the submitter; successful results reach everyone through
/// the subscription stream.
async fn submit(gw: &Arc<Gateway>, player: Uuid, family: MessageFamily, action: GameAction) {
    match gw.sessions.handle_for(&player) {
        Some(handle) => {
            if let Err(e) = handle.submit(player, action).await {
                gw.send_error(player, family, e.code(), e.to_string());
            }
        }
        None => {
            gw.send_error(player, family, "NOT_IN_GAME", "you are not in a game".into());
        }
    }
}

/// A dropped socket surrenders a lobby slot, but never a game seat.
fn handle_disconnect(gw: &Arc<Gateway>, player: Uuid) {
    if let Some(handle) = gw.sessions.handle_for(&player) {
        handle.disconnect(player);
    } else if let Some((_, remaining)) = gw.lobbies.leave(player) {
        if let Some(lobby) = remaining {
            gw.broadcast_lobby(&lobby, ServerMessage::LobbyUpdated { lobby: lobby.clone() });
        }
    }
}
