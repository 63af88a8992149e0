//! The session manager: one actor task per game.
//!
//! Each game's state, RNG, and subscriber list live inside a single
//! spawned task; commands arrive over a bounded queue and are processed
//! strictly in order, so every subscriber observes the same event
//! sequence. Many games run concurrently with no shared state beyond the
//! registry maps.

use crate::storage::GameStore;
use dashmap::DashMap;
use hexhaven_core::{
    EngineError, GameAction, GameEvent, GameState, Phase, PlayerColor, PlayerId, PlayerSeat,
    ResourceCount, TurnPhase,
};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Operator knobs for every game actor.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Command queue depth; a full queue fails fast with `Busy`.
    pub command_buffer: usize,
    /// Per-subscriber event buffer; an overflowing subscriber is dropped
    /// and must resubscribe for a fresh snapshot.
    pub subscriber_buffer: usize,
    /// Active trades expire after this long.
    pub trade_expiry: Duration,
    /// Auto-resolve the turn of a player disconnected this long.
    /// Disabled by default.
    pub turn_timeout: Option<Duration>,
    /// Tear the game down once every player has been gone this long.
    pub abandonment_window: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            subscriber_buffer: 128,
            trade_expiry: Duration::from_secs(60),
            turn_timeout: None,
            abandonment_window: Duration::from_secs(300),
        }
    }
}

/// Errors surfaced to a submitting client.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("you are not in a game")]
    NotInGame,

    #[error("the game is busy, try again")]
    Busy,

    #[error("internal error")]
    Internal,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotInGame => "NOT_IN_GAME",
            SessionError::Busy => "BUSY",
            SessionError::Internal => "INTERNAL_ERROR",
            SessionError::Engine(e) => e.code(),
        }
    }
}

/// What subscribers receive: ordered event batches interleaved with full
/// snapshots after each successful command.
#[derive(Debug, Clone)]
pub enum GameUpdate {
    Events(Vec<GameEvent>),
    Snapshot(Box<GameState>),
}

enum GameCommand {
    Act {
        user: Uuid,
        action: GameAction,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Subscribe {
        user: Uuid,
        sink: mpsc::Sender<GameUpdate>,
        reply: oneshot::Sender<Result<Box<GameState>, SessionError>>,
    },
    Disconnect {
        user: Uuid,
    },
    Snapshot {
        reply: oneshot::Sender<Box<GameState>>,
    },
}

/// Cheap handle onto one game's actor.
#[derive(Clone)]
pub struct GameHandle {
    pub code: String,
    tx: mpsc::Sender<GameCommand>,
}

impl GameHandle {
    /// Submit a command for serialized processing. Fails fast with `Busy`
    /// when the queue is full.
    pub async fn submit(&self, user: Uuid, action: GameAction) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(GameCommand::Act {
                user,
                action,
                reply,
            })
            .map_err(|_| SessionError::Busy)?;
        rx.await.map_err(|_| SessionError::Internal)?
    }

    /// Register an event sink for this player and get the current state.
    /// Also flips the player to connected.
    pub async fn subscribe(
        &self,
        user: Uuid,
        sink: mpsc::Sender<GameUpdate>,
    ) -> Result<Box<GameState>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(GameCommand::Subscribe { user, sink, reply })
            .map_err(|_| SessionError::Busy)?;
        rx.await.map_err(|_| SessionError::Internal)?
    }

    /// Best-effort disconnect notice; the player keeps their seat.
    pub fn disconnect(&self, user: Uuid) {
        let _ = self.tx.try_send(GameCommand::Disconnect { user });
    }

    pub async fn snapshot(&self) -> Option<Box<GameState>> {
        let (reply, rx) = oneshot::channel();
        self.tx.try_send(GameCommand::Snapshot { reply }).ok()?;
        rx.await.ok()
    }
}

/// Registry of running games and the player-to-game routing table.
pub struct SessionManager {
    games: Arc<DashMap<String, GameHandle>>,
    player_games: Arc<DashMap<Uuid, String>>,
    members: Arc<DashMap<String, Vec<Uuid>>>,
    config: SessionConfig,
    store: Arc<dyn GameStore>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, store: Arc<dyn GameStore>) -> Self {
        Self {
            games: Arc::new(DashMap::new()),
            player_games: Arc::new(DashMap::new()),
            members: Arc::new(DashMap::new()),
            config,
            store,
        }
    }

    /// Construct a game from a lobby roster and spawn its actor.
    pub fn create_game(
        &self,
        code: String,
        roster: Vec<(Uuid, String, PlayerColor)>,
    ) -> GameHandle {
        let mut seed_source = rand::rngs::OsRng;
        let seed = seed_source.next_u64();
        let mut rng = StdRng::seed_from_u64(seed);

        let seats: Vec<PlayerSeat> = roster
            .iter()
            .map(|(id, username, color)| PlayerSeat {
                user_id: id.to_string(),
                username: username.clone(),
                color: *color,
            })
            .collect();
        let seat_of: HashMap<Uuid, PlayerId> = roster
            .iter()
            .enumerate()
            .map(|(i, (id, _, _))| (*id, i as PlayerId))
            .collect();

        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let state = GameState::new(
            Uuid::new_v4().to_string(),
            code.clone(),
            seats,
            now_ms,
            &mut rng,
        );
        info!(code = %code, seed, players = roster.len(), "game created");

        let (tx, rx) = mpsc::channel(self.config.command_buffer);
        let handle = GameHandle {
            code: code.clone(),
            tx,
        };
        self.games.insert(code.clone(), handle.clone());
        self.members
            .insert(code.clone(), roster.iter().map(|(id, _, _)| *id).collect());
        for (id, _, _) in &roster {
            self.player_games.insert(*id, code.clone());
        }

        let actor = GameActor {
            state,
            rng,
            seat_of,
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            games: Arc::clone(&self.games),
            player_games: Arc::clone(&self.player_games),
            members: Arc::clone(&self.members),
        };
        tokio::spawn(actor.run(rx));
        handle
    }

    pub fn handle_for(&self, user: &Uuid) -> Option<GameHandle> {
        let code = self.player_games.get(user)?.clone();
        self.games.get(&code).map(|h| h.clone())
    }

    pub fn game_code_of(&self, user: &Uuid) -> Option<String> {
        self.player_games.get(user).map(|c| c.clone())
    }

    pub fn members_of(&self, code: &str) -> Vec<Uuid> {
        self.members
            .get(code)
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }
}

struct Subscriber {
    user: Uuid,
    seat: PlayerId,
    sink: mpsc::Sender<GameUpdate>,
}

/// The per-game actor: exclusive owner of one game's state and RNG.
struct GameActor {
    state: GameState,
    rng: StdRng,
    seat_of: HashMap<Uuid, PlayerId>,
    config: SessionConfig,
    store: Arc<dyn GameStore>,
    games: Arc<DashMap<String, GameHandle>>,
    player_games: Arc<DashMap<Uuid, String>>,
    members: Arc<DashMap<String, Vec<Uuid>>>,
}

impl GameActor {
    async fn run(mut self, mut rx: mpsc::Receiver<GameCommand>) {
        if !self.state.board.balanced() {
            warn!(code = %self.state.code, "board kept adjacent high tokens after reshuffle limit");
        }

        // Everyone starts offline; seats flip online as connections
        // subscribe.
        for seat in 0..self.state.players.len() as PlayerId {
            self.state.set_connected(seat, false);
        }

        let mut subscribers: Vec<Subscriber> = Vec::new();
        let mut trade_deadline: Option<Instant> = None;
        let mut offline_since: HashMap<PlayerId, Instant> = self
            .seat_of
            .values()
            .map(|&seat| (seat, Instant::now()))
            .collect();
        let mut sweep = tokio::time::interval(Duration::from_secs(1));
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut done = false;
        while !done {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(GameCommand::Act { user, action, reply }) => {
                        let result = self.act(user, action, &mut subscribers, &mut trade_deadline);
                        done = self.state.is_finished() || self.state.status == hexhaven_core::GameStatus::Abandoned;
                        let _ = reply.send(result);
                    }
                    Some(GameCommand::Subscribe { user, sink, reply }) => {
                        let result = self.subscribe(user, sink, &mut subscribers, &mut offline_since);
                        let _ = reply.send(result);
                    }
                    Some(GameCommand::Disconnect { user }) => {
                        if let Some(&seat) = self.seat_of.get(&user) {
                            subscribers.retain(|s| s.user != user);
                            offline_since.entry(seat).or_insert_with(Instant::now);
                            if let Some(event) = self.state.set_connected(seat, false) {
                                self.fanout(vec![event], &mut subscribers, true);
                            }
                        }
                    }
                    Some(GameCommand::Snapshot { reply }) => {
                        let _ = reply.send(Box::new(self.state.clone()));
                    }
                },
                _ = sweep.tick() => {
                    done = self.sweep(&mut subscribers, &mut trade_deadline, &offline_since);
                }
            }
        }

        self.teardown();
    }

    fn act(
        &mut self,
        user: Uuid,
        action: GameAction,
        subscribers: &mut Vec<Subscriber>,
        trade_deadline: &mut Option<Instant>,
    ) -> Result<(), SessionError> {
        let seat = *self.seat_of.get(&user).ok_or(SessionError::NotInGame)?;
        let events = self.state.apply(seat, action, &mut self.rng)?;

        for event in &events {
            match event {
                GameEvent::TradeProposed { .. } => {
                    *trade_deadline = Some(Instant::now() + self.config.trade_expiry);
                }
                GameEvent::TradeCompleted { .. }
                | GameEvent::TradeCancelled
                | GameEvent::TradeExpired => {
                    *trade_deadline = None;
                }
                GameEvent::GameWon { player, .. } => {
                    self.state.finished_at_ms = Some(
                        SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .map(|d| d.as_millis() as u64)
                            .unwrap_or(0),
                    );
                    info!(code = %self.state.code, winner = *player, "game finished");
                    self.store.save_finished(&self.state);
                }
                _ => {}
            }
        }

        self.fanout(events, subscribers, true);
        Ok(())
    }

    fn subscribe(
        &mut self,
        user: Uuid,
        sink: mpsc::Sender<GameUpdate>,
        subscribers: &mut Vec<Subscriber>,
        offline_since: &mut HashMap<PlayerId, Instant>,
    ) -> Result<Box<GameState>, SessionError> {
        let seat = *self.seat_of.get(&user).ok_or(SessionError::NotInGame)?;
        subscribers.retain(|s| s.user != user);
        offline_since.remove(&seat);
        // Announce the reconnect to the existing audience; the new
        // subscriber learns everything from the snapshot.
        if let Some(event) = self.state.set_connected(seat, true) {
            self.fanout(vec![event], subscribers, false);
        }
        subscribers.push(Subscriber { user, seat, sink });
        Ok(Box::new(self.state.clone()))
    }

    /// Deliver events (and optionally a fresh snapshot) to every
    /// subscriber. The stolen-resource type is visible only to thief and
    /// victim. Subscribers that cannot keep up are dropped; they will
    /// resubscribe and resynchronize from a snapshot.
    fn fanout(&self, events: Vec<GameEvent>, subscribers: &mut Vec<Subscriber>, snapshot: bool) {
        if events.is_empty() && !snapshot {
            return;
        }
        subscribers.retain(|sub| {
            let visible: Vec<GameEvent> = events
                .iter()
                .map(|e| redact_for(e, sub.seat))
                .collect();
            let mut ok = if visible.is_empty() {
                true
            } else {
                sub.sink.try_send(GameUpdate::Events(visible)).is_ok()
            };
            if ok && snapshot {
                ok = sub
                    .sink
                    .try_send(GameUpdate::Snapshot(Box::new(self.state.clone())))
                    .is_ok();
            }
            if !ok {
                debug!(code = %self.state.code, user = %sub.user, "dropping slow subscriber");
            }
            ok
        });
    }

    /// Periodic housekeeping: trade expiry, disconnected-turn auto-play,
    /// abandonment. Returns true when the game should shut down.
    fn sweep(
        &mut self,
        subscribers: &mut Vec<Subscriber>,
        trade_deadline: &mut Option<Instant>,
        offline_since: &HashMap<PlayerId, Instant>,
    ) -> bool {
        if trade_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            *trade_deadline = None;
            if let Some(event) = self.state.expire_active_trade() {
                self.fanout(vec![event], subscribers, true);
            }
        }

        if let Some(timeout) = self.config.turn_timeout {
            if self.state.phase == Phase::Playing {
                let current = self.state.current_player_id();
                let timed_out = offline_since
                    .get(&current)
                    .is_some_and(|since| since.elapsed() >= timeout);
                if timed_out {
                    let events = self.auto_resolve_turn();
                    if !events.is_empty() {
                        self.fanout(events, subscribers, true);
                    }
                    if self.state.is_finished() {
                        return true;
                    }
                }
            }
        }

        let everyone_gone = self
            .seat_of
            .values()
            .all(|seat| offline_since.contains_key(seat));
        if everyone_gone {
            let gone_for = offline_since
                .values()
                .map(|t| t.elapsed())
                .min()
                .unwrap_or_default();
            if gone_for >= self.config.abandonment_window {
                info!(code = %self.state.code, "abandoning game, all players gone");
                self.state.status = hexhaven_core::GameStatus::Abandoned;
                return true;
            }
        }
        false
    }

    /// Play out the disconnected current player's obligations with the
    /// engine's own actions: random discards, a default robber move, a
    /// default steal, then end of turn.
    fn auto_resolve_turn(&mut self) -> Vec<GameEvent> {
        let mut out = Vec::new();
        for _ in 0..16 {
            if self.state.is_finished() || self.state.phase != Phase::Playing {
                break;
            }
            // Discard debts block everyone; settle the offline ones.
            if self.state.turn_phase == TurnPhase::Discard {
                let debtor = self
                    .state
                    .pending_discards
                    .iter()
                    .find(|d| !self.state.players[d.player as usize].is_connected)
                    .cloned();
                let Some(debt) = debtor else { break };
                let mut hand = self.state.players[debt.player as usize].resources;
                let mut discard = ResourceCount::new();
                for _ in 0..debt.count {
                    if let Some(r) = hand.take_random(&mut self.rng) {
                        discard.add(r, 1);
                    }
                }
                match self.state.apply(
                    debt.player,
                    GameAction::DiscardResources(discard),
                    &mut self.rng,
                ) {
                    Ok(events) => out.extend(events),
                    Err(_) => break,
                }
                continue;
            }

            let current = self.state.current_player_id();
            if self.state.players[current as usize].is_connected {
                break;
            }
            let action = match self.state.turn_phase {
                TurnPhase::PreRoll => GameAction::RollDice,
                TurnPhase::RobberMove => {
                    let target = self
                        .state
                        .board
                        .tiles()
                        .iter()
                        .map(|t| t.id)
                        .find(|id| *id != self.state.board.robber_hex());
                    match target {
                        Some(hex) => GameAction::MoveRobber(hex),
                        None => break,
                    }
                }
                TurnPhase::RobberSteal => {
                    let victim = self
                        .state
                        .board
                        .players_adjacent_to_hex(&self.state.board.robber_hex())
                        .into_iter()
                        .find(|&p| p != current);
                    match victim {
                        Some(victim) => GameAction::StealResource { victim },
                        None => break,
                    }
                }
                TurnPhase::RoadBuilding => {
                    // Free roads: place anywhere legal until the phase
                    // reverts on its own.
                    let spot = self
                        .state
                        .board
                        .tiles()
                        .iter()
                        .flat_map(|t| t.coord.edges())
                        .find(|e| self.state.board.road_placement_legal(e, current));
                    match spot {
                        Some(edge) => GameAction::BuildRoad(edge),
                        None => break,
                    }
                }
                TurnPhase::Main => GameAction::EndTurn,
                _ => break,
            };
            match self.state.apply(current, action, &mut self.rng) {
                Ok(events) => {
                    out.extend(events);
                    // Stop after handing the turn over.
                    if self.state.turn_phase == TurnPhase::PreRoll
                        && self.state.current_player_id() != current
                    {
                        break;
                    }
                }
                Err(err) => {
                    warn!(code = %self.state.code, %err, "auto-resolve stopped");
                    break;
                }
            }
        }
        out
    }

    fn teardown(self) {
        self.games.remove(&self.state.code);
        self.members.remove(&self.state.code);
        for user in self.seat_of.keys() {
            self.player_games.remove(user);
        }
        debug!(code = %self.state.code, "game actor stopped");
    }
}

/// Only thief and victim learn what was stolen.
fn redact_for(event: &GameEvent, seat: PlayerId) -> GameEvent {
    match event {
        GameEvent::ResourceStolen { thief, victim, .. }
            if seat != *thief && seat != *victim =>
        {
            GameEvent::ResourceStolen {
                thief: *thief,
                victim: *victim,
                resource: None,
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NoopStore;
    use hexhaven_core::Resource;

    fn manager() -> SessionManager {
        SessionManager::new(SessionConfig::default(), Arc::new(NoopStore))
    }

    fn roster(n: usize) -> Vec<(Uuid, String, PlayerColor)> {
        (0..n)
            .map(|i| (Uuid::new_v4(), format!("player{i}"), PlayerColor::ALL[i]))
            .collect()
    }

    #[tokio::test]
    async fn subscribe_returns_snapshot_and_routes_commands() {
        let sessions = manager();
        let players = roster(2);
        let handle = sessions.create_game("GAMEAA".into(), players.clone());

        let (sink, mut updates) = mpsc::channel(32);
        let snapshot = handle.subscribe(players[0].0, sink).await.unwrap();
        assert_eq!(snapshot.code, "GAMEAA");
        assert_eq!(snapshot.players.len(), 2);
        assert_eq!(snapshot.phase, Phase::RollForOrder);

        // Seat 0 rolls for order; the subscriber sees the event and then a
        // snapshot reflecting it.
        handle
            .submit(players[0].0, GameAction::RollForOrder)
            .await
            .unwrap();
        let update = updates.recv().await.unwrap();
        match update {
            GameUpdate::Events(events) => {
                assert!(matches!(events[0], GameEvent::OrderRolled { player: 0, .. }));
            }
            GameUpdate::Snapshot(_) => panic!("events come before the snapshot"),
        }
        match updates.recv().await.unwrap() {
            GameUpdate::Snapshot(state) => {
                assert!(state.roll_for_order.as_ref().unwrap().rolls[0].is_some());
            }
            GameUpdate::Events(_) => panic!("expected the snapshot"),
        }
    }

    #[tokio::test]
    async fn errors_return_to_the_submitter_only() {
        let sessions = manager();
        let players = roster(2);
        let handle = sessions.create_game("GAMEBB".into(), players.clone());

        let (sink, mut updates) = mpsc::channel(32);
        handle.subscribe(players[0].0, sink).await.unwrap();

        // Seat 1 cannot roll first.
        let err = handle
            .submit(players[1].0, GameAction::RollForOrder)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Engine(EngineError::NotYourTurn));
        // No events reached the subscriber.
        assert!(updates.try_recv().is_err());

        // An outsider is not routed at all.
        let err = handle
            .submit(Uuid::new_v4(), GameAction::RollForOrder)
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::NotInGame);
    }

    #[tokio::test]
    async fn s6_concurrent_games_are_isolated() {
        let sessions = manager();
        let players_x = roster(2);
        let players_y = roster(2);
        let x = sessions.create_game("GAMEXX".into(), players_x.clone());
        let y = sessions.create_game("GAMEYY".into(), players_y.clone());
        assert_eq!(sessions.game_count(), 2);

        let (sink_y, mut updates_y) = mpsc::channel(32);
        y.subscribe(players_y[0].0, sink_y).await.unwrap();
        let y_before = y.snapshot().await.unwrap();

        // Drive X; Y must neither change nor emit.
        x.submit(players_x[0].0, GameAction::RollForOrder)
            .await
            .unwrap();
        x.submit(players_x[1].0, GameAction::RollForOrder)
            .await
            .unwrap();

        let y_after = y.snapshot().await.unwrap();
        assert_eq!(
            serde_json::to_string(&*y_before).unwrap(),
            serde_json::to_string(&*y_after).unwrap()
        );
        assert!(updates_y.try_recv().is_err());

        // X's players are routed to X, Y's to Y.
        assert_eq!(sessions.game_code_of(&players_x[0].0).unwrap(), "GAMEXX");
        assert_eq!(sessions.game_code_of(&players_y[1].0).unwrap(), "GAMEYY");
    }

    #[tokio::test]
    async fn disconnect_marks_offline_but_keeps_the_seat() {
        let sessions = manager();
        let players = roster(2);
        let handle = sessions.create_game("GAMECC".into(), players.clone());

        let (sink0, mut updates0) = mpsc::channel(32);
        handle.subscribe(players[0].0, sink0).await.unwrap();
        let (sink1, _updates1) = mpsc::channel(32);
        handle.subscribe(players[1].0, sink1).await.unwrap();
        // Player 1 coming online is broadcast.
        match updates0.recv().await.unwrap() {
            GameUpdate::Events(events) => {
                assert!(matches!(
                    events[0],
                    GameEvent::PlayerReconnected { player: 1 }
                ));
            }
            _ => panic!("expected the reconnect event"),
        }

        handle.disconnect(players[1].0);
        // Skip snapshots until the disconnect event arrives.
        loop {
            match updates0.recv().await.unwrap() {
                GameUpdate::Events(events) => {
                    assert!(matches!(
                        events[0],
                        GameEvent::PlayerDisconnected { player: 1 }
                    ));
                    break;
                }
                GameUpdate::Snapshot(_) => continue,
            }
        }

        let snapshot = handle.snapshot().await.unwrap();
        assert!(!snapshot.players[1].is_connected);
        assert_eq!(snapshot.players[1].username, "player1");
    }

    #[test]
    fn steal_details_are_redacted_for_bystanders() {
        let stolen = GameEvent::ResourceStolen {
            thief: 0,
            victim: 1,
            resource: Some(Resource::Ore),
        };
        assert!(matches!(
            redact_for(&stolen, 0),
            GameEvent::ResourceStolen {
                resource: Some(Resource::Ore),
                ..
            }
        ));
        assert!(matches!(
            redact_for(&stolen, 1),
            GameEvent::ResourceStolen {
                resource: Some(Resource::Ore),
                ..
            }
        ));
        assert!(matches!(
            redact_for(&stolen, 2),
            GameEvent::ResourceStolen { resource: None, .. }
        ));
    }
}
