//! Pre-game lobbies: creation, joining, colors, ready flags, host start.
//!
//! A lobby lives until its game starts or its last player leaves. The
//! countdown and the handoff to the session manager are driven by the
//! gateway; this module only owns lobby state.

use crate::protocol::{LobbyInfo, LobbyPlayerInfo, LobbyStatus};
use dashmap::DashMap;
use hexhaven_core::PlayerColor;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

/// Code alphabet without the visually ambiguous I, O, 0, 1.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error("lobby is full")]
    LobbyFull,

    #[error("that color is already taken")]
    ColorTaken,

    #[error("no lobby with that code")]
    CodeUnknown,

    #[error("the game has already started")]
    AlreadyStarted,

    #[error("only the host can do that")]
    NotHost,

    #[error("at least two players are needed")]
    NotEnoughPlayers,

    #[error("every player must be ready")]
    PlayersNotReady,

    #[error("you are not in a lobby")]
    NotInLobby,
}

impl LobbyError {
    pub fn code(&self) -> &'static str {
        match self {
            LobbyError::LobbyFull => "LOBBY_FULL",
            LobbyError::ColorTaken => "COLOR_TAKEN",
            LobbyError::CodeUnknown => "CODE_UNKNOWN",
            LobbyError::AlreadyStarted => "ALREADY_STARTED",
            LobbyError::NotHost => "NOT_HOST",
            LobbyError::NotEnoughPlayers => "NOT_ENOUGH_PLAYERS",
            LobbyError::PlayersNotReady => "PLAYERS_NOT_READY",
            LobbyError::NotInLobby => "NOT_IN_LOBBY",
        }
    }
}

/// One member of a lobby.
#[derive(Debug, Clone)]
pub struct LobbyPlayer {
    pub id: Uuid,
    pub username: String,
    pub color: PlayerColor,
    pub is_ready: bool,
    pub is_host: bool,
}

impl LobbyPlayer {
    fn to_info(&self) -> LobbyPlayerInfo {
        LobbyPlayerInfo {
            id: self.id,
            username: self.username.clone(),
            color: self.color,
            is_ready: self.is_ready,
            is_host: self.is_host,
        }
    }
}

/// A lobby waiting to become a game.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub code: String,
    pub host_id: Uuid,
    pub players: Vec<LobbyPlayer>,
    pub max_players: u8,
    pub status: LobbyStatus,
}

impl Lobby {
    pub fn to_info(&self) -> LobbyInfo {
        LobbyInfo {
            code: self.code.clone(),
            host_id: self.host_id,
            players: self.players.iter().map(LobbyPlayer::to_info).collect(),
            max_players: self.max_players,
            status: self.status,
        }
    }

    fn free_color(&self) -> Option<PlayerColor> {
        PlayerColor::ALL
            .into_iter()
            .find(|c| !self.players.iter().any(|p| p.color == *c))
    }

    fn member_mut(&mut self, player: Uuid) -> Option<&mut LobbyPlayer> {
        self.players.iter_mut().find(|p| p.id == player)
    }
}

/// All lobbies, keyed by code, plus the player-to-lobby routing table.
pub struct LobbyManager {
    lobbies: DashMap<String, Lobby>,
    player_lobbies: DashMap<Uuid, String>,
}

impl LobbyManager {
    pub fn new() -> Self {
        Self {
            lobbies: DashMap::new(),
            player_lobbies: DashMap::new(),
        }
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        loop {
            let code: String = (0..CODE_LEN)
                .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.lobbies.contains_key(&code) {
                return code;
            }
        }
    }

    /// Create a lobby with `host` as its first member.
    pub fn create(&self, host: Uuid, username: String, max_players: u8) -> LobbyInfo {
        let code = self.generate_code();
        let lobby = Lobby {
            code: code.clone(),
            host_id: host,
            players: vec![LobbyPlayer {
                id: host,
                username,
                color: PlayerColor::ALL[0],
                is_ready: false,
                is_host: true,
            }],
            max_players: max_players.clamp(2, 4),
            status: LobbyStatus::Waiting,
        };
        let info = lobby.to_info();
        self.lobbies.insert(code.clone(), lobby);
        self.player_lobbies.insert(host, code);
        info
    }

    /// Join a lobby. Re-joining a lobby one is already in acts as a
    /// reconnect and just returns the current state.
    pub fn join(&self, code: &str, player: Uuid, username: String) -> Result<LobbyInfo, LobbyError> {
        let mut lobby = self.lobbies.get_mut(code).ok_or(LobbyError::CodeUnknown)?;
        if lobby.players.iter().any(|p| p.id == player) {
            return Ok(lobby.to_info());
        }
        if lobby.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyStarted);
        }
        if lobby.players.len() >= lobby.max_players as usize {
            return Err(LobbyError::LobbyFull);
        }
        let color = lobby.free_color().ok_or(LobbyError::LobbyFull)?;
        lobby.players.push(LobbyPlayer {
            id: player,
            username,
            color,
            is_ready: false,
            is_host: false,
        });
        self.player_lobbies.insert(player, code.to_string());
        Ok(lobby.to_info())
    }

    /// Remove a player. Returns the lobby code and its remaining state, or
    /// `None` state when the lobby dissolved with them.
    pub fn leave(&self, player: Uuid) -> Option<(String, Option<LobbyInfo>)> {
        let (_, code) = self.player_lobbies.remove(&player)?;
        let mut remove_lobby = false;
        let info = {
            let mut lobby = self.lobbies.get_mut(&code)?;
            lobby.players.retain(|p| p.id != player);
            if lobby.players.is_empty() {
                remove_lobby = true;
                None
            } else {
                // Promote the earliest remaining player when the host left.
                if lobby.host_id == player {
                    lobby.host_id = lobby.players[0].id;
                    for (i, p) in lobby.players.iter_mut().enumerate() {
                        p.is_host = i == 0;
                    }
                }
                Some(lobby.to_info())
            }
        };
        if remove_lobby {
            self.lobbies.remove(&code);
        }
        Some((code, info))
    }

    pub fn set_ready(&self, player: Uuid, ready: bool) -> Result<LobbyInfo, LobbyError> {
        let code = self.lobby_code_of(player).ok_or(LobbyError::NotInLobby)?;
        let mut lobby = self.lobbies.get_mut(&code).ok_or(LobbyError::NotInLobby)?;
        let member = lobby.member_mut(player).ok_or(LobbyError::NotInLobby)?;
        member.is_ready = ready;
        Ok(lobby.to_info())
    }

    pub fn set_color(&self, player: Uuid, color: PlayerColor) -> Result<LobbyInfo, LobbyError> {
        let code = self.lobby_code_of(player).ok_or(LobbyError::NotInLobby)?;
        let mut lobby = self.lobbies.get_mut(&code).ok_or(LobbyError::NotInLobby)?;
        if lobby
            .players
            .iter()
            .any(|p| p.color == color && p.id != player)
        {
            return Err(LobbyError::ColorTaken);
        }
        let member = lobby.member_mut(player).ok_or(LobbyError::NotInLobby)?;
        member.color = color;
        Ok(lobby.to_info())
    }

    /// Validate a start request and flip the lobby to `Starting`. The
    /// caller runs the countdown and then collects the roster with
    /// [`LobbyManager::take_started`].
    pub fn begin_start(&self, requester: Uuid) -> Result<LobbyInfo, LobbyError> {
        let code = self.lobby_code_of(requester).ok_or(LobbyError::NotInLobby)?;
        let mut lobby = self.lobbies.get_mut(&code).ok_or(LobbyError::NotInLobby)?;
        if lobby.host_id != requester {
            return Err(LobbyError::NotHost);
        }
        if lobby.status != LobbyStatus::Waiting {
            return Err(LobbyError::AlreadyStarted);
        }
        if lobby.players.len() < 2 {
            return Err(LobbyError::NotEnoughPlayers);
        }
        // The host's own ready flag is implied by pressing start.
        if lobby.players.iter().any(|p| !p.is_host && !p.is_ready) {
            return Err(LobbyError::PlayersNotReady);
        }
        lobby.status = LobbyStatus::Starting;
        Ok(lobby.to_info())
    }

    /// Consume a starting lobby for game construction.
    pub fn take_started(&self, code: &str) -> Option<Lobby> {
        let (_, mut lobby) = self.lobbies.remove(code)?;
        lobby.status = LobbyStatus::Started;
        for p in &lobby.players {
            self.player_lobbies.remove(&p.id);
        }
        Some(lobby)
    }

    pub fn lobby_code_of(&self, player: Uuid) -> Option<String> {
        self.player_lobbies.get(&player).map(|c| c.clone())
    }

    pub fn info_of(&self, code: &str) -> Option<LobbyInfo> {
        self.lobbies.get(code).map(|l| l.to_info())
    }

    /// Joinable lobbies, for the lobby browser.
    pub fn list_waiting(&self) -> Vec<LobbyInfo> {
        self.lobbies
            .iter()
            .filter(|l| l.status == LobbyStatus::Waiting)
            .map(|l| l.to_info())
            .collect()
    }
}

impl Default for LobbyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_the_unambiguous_alphabet() {
        let manager = LobbyManager::new();
        for _ in 0..50 {
            let info = manager.create(Uuid::new_v4(), "host".into(), 4);
            assert_eq!(info.code.len(), 6);
            for c in info.code.chars() {
                assert!(CODE_ALPHABET.contains(&(c as u8)), "bad char {c}");
                assert!(!"IO01".contains(c));
            }
        }
    }

    #[test]
    fn join_assigns_unique_colors_until_full() {
        let manager = LobbyManager::new();
        let host = Uuid::new_v4();
        let info = manager.create(host, "host".into(), 3);

        let p2 = Uuid::new_v4();
        let p3 = Uuid::new_v4();
        manager.join(&info.code, p2, "two".into()).unwrap();
        let info = manager.join(&info.code, p3, "three".into()).unwrap();

        let mut colors: Vec<_> = info.players.iter().map(|p| p.color).collect();
        colors.dedup();
        assert_eq!(colors.len(), 3);

        assert_eq!(
            manager.join(&info.code, Uuid::new_v4(), "four".into()),
            Err(LobbyError::LobbyFull)
        );
    }

    #[test]
    fn rejoin_is_a_reconnect() {
        let manager = LobbyManager::new();
        let host = Uuid::new_v4();
        let info = manager.create(host, "host".into(), 2);
        let again = manager.join(&info.code, host, "host".into()).unwrap();
        assert_eq!(again.players.len(), 1);
    }

    #[test]
    fn color_change_rejects_taken_colors() {
        let manager = LobbyManager::new();
        let host = Uuid::new_v4();
        let info = manager.create(host, "host".into(), 2);
        let p2 = Uuid::new_v4();
        manager.join(&info.code, p2, "two".into()).unwrap();

        // Host holds the first color.
        assert_eq!(
            manager.set_color(p2, PlayerColor::ALL[0]),
            Err(LobbyError::ColorTaken)
        );
        assert!(manager.set_color(p2, PlayerColor::ALL[2]).is_ok());
    }

    #[test]
    fn start_requires_host_quorum_and_ready_flags() {
        let manager = LobbyManager::new();
        let host = Uuid::new_v4();
        let info = manager.create(host, "host".into(), 4);

        assert_eq!(manager.begin_start(host), Err(LobbyError::NotEnoughPlayers));

        let p2 = Uuid::new_v4();
        manager.join(&info.code, p2, "two".into()).unwrap();
        assert_eq!(manager.begin_start(p2), Err(LobbyError::NotHost));
        assert_eq!(manager.begin_start(host), Err(LobbyError::PlayersNotReady));

        manager.set_ready(p2, true).unwrap();
        let started = manager.begin_start(host).unwrap();
        assert_eq!(started.status, LobbyStatus::Starting);

        // A second start is rejected, and late joins bounce.
        assert_eq!(manager.begin_start(host), Err(LobbyError::AlreadyStarted));
        assert_eq!(
            manager.join(&info.code, Uuid::new_v4(), "late".into()),
            Err(LobbyError::AlreadyStarted)
        );

        let lobby = manager.take_started(&info.code).unwrap();
        assert_eq!(lobby.players.len(), 2);
        assert!(manager.info_of(&info.code).is_none());
        assert!(manager.lobby_code_of(host).is_none());
    }

    #[test]
    fn host_leaving_promotes_earliest_member() {
        let manager = LobbyManager::new();
        let host = Uuid::new_v4();
        let info = manager.create(host, "host".into(), 4);
        let p2 = Uuid::new_v4();
        let p3 = Uuid::new_v4();
        manager.join(&info.code, p2, "two".into()).unwrap();
        manager.join(&info.code, p3, "three".into()).unwrap();

        let (_, remaining) = manager.leave(host).unwrap();
        let remaining = remaining.unwrap();
        assert_eq!(remaining.host_id, p2);
        assert!(remaining.players[0].is_host);

        manager.leave(p2).unwrap();
        let (_, last) = manager.leave(p3).unwrap();
        assert!(last.is_none(), "empty lobby dissolves");
        assert!(manager.info_of(&info.code).is_none());
    }
}
