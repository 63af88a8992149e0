//! The authoritative game state and its transitions.
//!
//! Every mutation goes through [`GameState::apply`]: gate checks first
//! (turn ownership, phase, turn-phase), then placement/affordability
//! checks, then the mutation and its events. A failed action returns an
//! error and leaves the state untouched. All randomness (dice, card draws,
//! steals) flows through the caller-supplied RNG so a game is replayable
//! from its seed.

use crate::actions::{GameAction, GameEvent, PendingDiscard, TradeProposal};
use crate::board::Board;
use crate::hex::{EdgeId, HexId, VertexId};
use crate::player::{DevCard, DevCardKind, PlayerColor, PlayerId, PlayerState};
use crate::resources::{costs, Bank, Resource, ResourceCount};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Road length required to hold Longest Road.
pub const LONGEST_ROAD_MIN: u32 = 5;

/// Played knights required to hold Largest Army.
pub const LARGEST_ARMY_MIN: u32 = 3;

/// Victory points that end the game.
pub const VICTORY_POINTS_TO_WIN: u32 = 10;

/// Hand size above which a seven forces a discard.
pub const DISCARD_THRESHOLD: u32 = 7;

/// Free roads granted by a road-building card.
pub const ROAD_BUILDING_ROADS: u8 = 2;

/// Errors returned from rejected actions. Each carries a stable short code
/// for the wire.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("not your turn")]
    NotYourTurn,

    #[error("action not allowed in this phase")]
    WrongPhase,

    #[error("action not allowed in this turn phase")]
    WrongTurnPhase,

    #[error("illegal placement: {0}")]
    IllegalPlacement(String),

    #[error("cannot afford this")]
    CannotAfford,

    #[error("no pieces of that kind remaining")]
    PieceExhausted,

    #[error("development card deck is empty")]
    DeckEmpty,

    #[error("bank cannot supply that resource")]
    BankShortage,

    #[error("no such card is playable this turn")]
    CardUnavailable,

    #[error("invalid trade")]
    InvalidTrade,

    #[error("no active trade")]
    NoActiveTrade,

    #[error("invalid discard")]
    InvalidDiscard,

    #[error("game is already finished")]
    GameFinished,

    #[error("unknown player")]
    UnknownPlayer,
}

impl EngineError {
    /// Stable error code used in wire-level `{code, message}` payloads.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotYourTurn => "NOT_YOUR_TURN",
            EngineError::WrongPhase => "WRONG_PHASE",
            EngineError::WrongTurnPhase => "WRONG_TURN_PHASE",
            EngineError::IllegalPlacement(_) => "ILLEGAL_PLACEMENT",
            EngineError::CannotAfford => "CANNOT_AFFORD",
            EngineError::PieceExhausted => "PIECE_EXHAUSTED",
            EngineError::DeckEmpty => "DECK_EMPTY",
            EngineError::BankShortage => "BANK_SHORTAGE",
            EngineError::CardUnavailable => "CARD_UNAVAILABLE",
            EngineError::InvalidTrade => "INVALID_TRADE",
            EngineError::NoActiveTrade => "NO_ACTIVE_TRADE",
            EngineError::InvalidDiscard => "INVALID_DISCARD",
            EngineError::GameFinished => "GAME_FINISHED",
            EngineError::UnknownPlayer => "UNKNOWN_PLAYER",
        }
    }
}

/// Top-level game lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    Waiting,
    Setup,
    Playing,
    Finished,
    Abandoned,
}

/// The outer phase machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    RollForOrder,
    SetupFirst,
    SetupSecond,
    Playing,
    Finished,
}

/// The inner turn-phase machine, active while `phase == Playing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    PreRoll,
    Discard,
    RobberMove,
    RobberSteal,
    Main,
    RoadBuilding,
    YearOfPlenty,
    Monopoly,
}

/// What the active setup player must place next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupPlacing {
    Settlement,
    Road,
}

/// Dice results of the turn-order roll, by seating index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollForOrderState {
    pub rolls: Vec<Option<(u8, u8)>>,
}

/// Progress through a setup round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupState {
    /// How many players have finished their settlement+road this round.
    pub position: usize,
    pub placing: SetupPlacing,
    /// The settlement placed in the current step; the road must touch it.
    pub last_settlement: Option<VertexId>,
}

/// Seat assignment handed over from the lobby.
#[derive(Debug, Clone)]
pub struct PlayerSeat {
    pub user_id: String,
    pub username: String,
    pub color: PlayerColor,
}

/// Complete server-side state of one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    pub id: String,
    pub code: String,
    pub status: GameStatus,
    pub phase: Phase,
    pub board: Board,
    /// Players in seating order; a player's `id` is their index here.
    pub players: Vec<PlayerState>,
    /// Play order decided by the order roll.
    pub turn_order: Vec<PlayerId>,
    pub current_player_index: usize,
    pub turn_number: u32,
    pub turn_phase: TurnPhase,
    pub last_dice_roll: Option<(u8, u8)>,
    pub bank: Bank,
    /// Shuffled draw pile, server secret: never serialized.
    #[serde(skip)]
    pub deck: Vec<DevCardKind>,
    pub dev_card_deck_count: u32,
    pub roll_for_order: Option<RollForOrderState>,
    pub setup: Option<SetupState>,
    pub active_trade: Option<TradeProposal>,
    pub pending_discards: Vec<PendingDiscard>,
    pub road_building_roads_placed: u8,
    pub longest_road_holder: Option<PlayerId>,
    pub longest_road_length: u32,
    pub largest_army_holder: Option<PlayerId>,
    pub largest_army_size: u32,
    pub winner: Option<PlayerId>,
    pub dev_card_played_this_turn: bool,
    pub created_at_ms: u64,
    pub finished_at_ms: Option<u64>,
    next_dev_card_id: u32,
    next_trade_id: u32,
}

impl GameState {
    /// Create a game for 2-4 seated players with a fresh board and deck.
    pub fn new<R: Rng>(
        id: String,
        code: String,
        seats: Vec<PlayerSeat>,
        created_at_ms: u64,
        rng: &mut R,
    ) -> Self {
        assert!(
            (2..=4).contains(&seats.len()),
            "a game needs 2-4 players, got {}",
            seats.len()
        );

        let players: Vec<PlayerState> = seats
            .into_iter()
            .enumerate()
            .map(|(i, seat)| {
                PlayerState::new(i as PlayerId, seat.user_id, seat.username, seat.color)
            })
            .collect();
        let seat_count = players.len();

        let mut deck = DevCardKind::standard_deck();
        deck.shuffle(rng);

        Self {
            id,
            code,
            status: GameStatus::Setup,
            phase: Phase::RollForOrder,
            board: Board::generate(rng),
            players,
            turn_order: (0..seat_count as PlayerId).collect(),
            current_player_index: 0,
            turn_number: 0,
            turn_phase: TurnPhase::PreRoll,
            last_dice_roll: None,
            bank: Bank::new(),
            dev_card_deck_count: deck.len() as u32,
            deck,
            roll_for_order: Some(RollForOrderState {
                rolls: vec![None; seat_count],
            }),
            setup: None,
            active_trade: None,
            pending_discards: Vec::new(),
            road_building_roads_placed: 0,
            longest_road_holder: None,
            longest_road_length: 0,
            largest_army_holder: None,
            largest_army_size: 0,
            winner: None,
            dev_card_played_this_turn: false,
            created_at_ms,
            finished_at_ms: None,
            next_dev_card_id: 0,
            next_trade_id: 0,
        }
    }

    /// The player whose turn (or setup step) it is.
    pub fn current_player_id(&self) -> PlayerId {
        self.turn_order[self.current_player_index]
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    /// Apply one action for one player. On success the events describe
    /// everything that changed; on error nothing changed.
    pub fn apply<R: Rng>(
        &mut self,
        player: PlayerId,
        action: GameAction,
        rng: &mut R,
    ) -> Result<Vec<GameEvent>, EngineError> {
        if self.is_finished() {
            return Err(EngineError::GameFinished);
        }
        if player as usize >= self.players.len() {
            return Err(EngineError::UnknownPlayer);
        }

        let mut events = match action {
            GameAction::RollForOrder => {
                let (d1, d2) = (rng.gen_range(1..=6), rng.gen_range(1..=6));
                self.roll_for_order_with(player, d1, d2)?
            }
            GameAction::PlaceSetupSettlement(vertex) => self.place_setup_settlement(player, vertex)?,
            GameAction::PlaceSetupRoad(edge) => self.place_setup_road(player, edge)?,
            GameAction::RollDice => {
                let (d1, d2) = (rng.gen_range(1..=6), rng.gen_range(1..=6));
                self.roll_dice_with(player, d1, d2)?
            }
            GameAction::DiscardResources(counts) => self.discard_resources(player, counts)?,
            GameAction::MoveRobber(hex) => self.move_robber(player, hex)?,
            GameAction::StealResource { victim } => self.steal_resource(player, victim, rng)?,
            GameAction::BuildSettlement(vertex) => self.build_settlement(player, vertex)?,
            GameAction::BuildCity(vertex) => self.build_city(player, vertex)?,
            GameAction::BuildRoad(edge) => self.build_road(player, edge)?,
            GameAction::BuyDevCard => self.buy_dev_card(player)?,
            GameAction::PlayKnight => self.play_knight(player)?,
            GameAction::PlayRoadBuilding => self.play_road_building(player)?,
            GameAction::PlayYearOfPlenty(r1, r2) => self.play_year_of_plenty(player, r1, r2)?,
            GameAction::PlayMonopoly(resource) => self.play_monopoly(player, resource)?,
            GameAction::ProposeTrade {
                to,
                offering,
                requesting,
            } => self.propose_trade(player, to, offering, requesting)?,
            GameAction::AcceptTrade => self.accept_trade(player)?,
            GameAction::RejectTrade => self.reject_trade(player)?,
            GameAction::CancelTrade => self.cancel_trade(player)?,
            GameAction::HarborTrade { give, receive } => self.harbor_trade(player, give, receive)?,
            GameAction::EndTurn => self.end_turn(player)?,
        };

        // Any mutation can push somebody to ten points, including award
        // transfers on another player's turn.
        events.extend(self.check_winner());
        Ok(events)
    }

    // ---- gate helpers ----

    fn ensure_current(&self, player: PlayerId) -> Result<(), EngineError> {
        if self.current_player_id() != player {
            return Err(EngineError::NotYourTurn);
        }
        Ok(())
    }

    fn ensure_playing(&self) -> Result<(), EngineError> {
        if self.phase != Phase::Playing {
            return Err(EngineError::WrongPhase);
        }
        Ok(())
    }

    fn ensure_turn_phase(&self, expected: TurnPhase) -> Result<(), EngineError> {
        if self.turn_phase != expected {
            return Err(EngineError::WrongTurnPhase);
        }
        Ok(())
    }

    /// Where the turn lands after the robber sequence: back to the roll if
    /// a pre-roll knight started it, otherwise into the main phase.
    fn post_robber_turn_phase(&self) -> TurnPhase {
        if self.last_dice_roll.is_none() {
            TurnPhase::PreRoll
        } else {
            TurnPhase::Main
        }
    }

    // ---- roll for order ----

    /// Resolve an order roll with known dice. [`GameAction::RollForOrder`]
    /// samples the dice and delegates here.
    pub fn roll_for_order_with(
        &mut self,
        player: PlayerId,
        d1: u8,
        d2: u8,
    ) -> Result<Vec<GameEvent>, EngineError> {
        if self.phase != Phase::RollForOrder {
            return Err(EngineError::WrongPhase);
        }
        let state = self.roll_for_order.as_mut().ok_or(EngineError::WrongPhase)?;
        // Seats roll strictly in seating order.
        let expected = state
            .rolls
            .iter()
            .position(|r| r.is_none())
            .ok_or(EngineError::WrongPhase)?;
        if player as usize != expected {
            return Err(EngineError::NotYourTurn);
        }
        state.rolls[expected] = Some((d1, d2));

        let mut events = vec![GameEvent::OrderRolled {
            player,
            roll: (d1, d2),
            total: d1 + d2,
        }];

        if state.rolls.iter().all(|r| r.is_some()) {
            let totals: Vec<u8> = state
                .rolls
                .iter()
                .map(|r| r.map(|(a, b)| a + b).unwrap_or(0))
                .collect();
            let mut order: Vec<PlayerId> = (0..self.players.len() as PlayerId).collect();
            // Stable sort: ties keep seating order.
            order.sort_by_key(|&p| std::cmp::Reverse(totals[p as usize]));
            self.turn_order = order;
            self.current_player_index = 0;
            self.phase = Phase::SetupFirst;
            self.setup = Some(SetupState {
                position: 0,
                placing: SetupPlacing::Settlement,
                last_settlement: None,
            });
            events.push(GameEvent::PhaseChanged {
                phase: Phase::SetupFirst,
            });
        }
        Ok(events)
    }

    // ---- setup rounds ----

    pub fn place_setup_settlement(
        &mut self,
        player: PlayerId,
        vertex: VertexId,
    ) -> Result<Vec<GameEvent>, EngineError> {
        if !matches!(self.phase, Phase::SetupFirst | Phase::SetupSecond) {
            return Err(EngineError::WrongPhase);
        }
        self.ensure_current(player)?;
        let setup = self.setup.as_ref().ok_or(EngineError::WrongPhase)?;
        if setup.placing != SetupPlacing::Settlement {
            return Err(EngineError::WrongTurnPhase);
        }
        if !self.board.settlement_placement_legal(&vertex, player, true) {
            return Err(EngineError::IllegalPlacement(format!(
                "cannot settle at {vertex}"
            )));
        }

        self.board.place_settlement(vertex, player);
        let p = &mut self.players[player as usize];
        p.settlements.push(vertex);
        p.public_victory_points += 1;

        let mut events = vec![GameEvent::SettlementBuilt { player, vertex }];

        // The second-round settlement pays out its adjacent tiles once.
        if self.phase == Phase::SetupSecond {
            let mut granted = ResourceCount::new();
            for tile in self.board.tiles_at_vertex(&vertex) {
                if let Some(resource) = tile.terrain.resource() {
                    granted.add(resource, 1);
                }
            }
            if !granted.is_empty() {
                let mut grants = Vec::new();
                for (resource, amount) in granted.iter() {
                    self.bank.withdraw(resource, amount);
                    grants.push((player, resource, amount));
                }
                self.players[player as usize].resources.add_all(&granted);
                events.push(GameEvent::ResourcesDistributed {
                    grants,
                    withheld: Vec::new(),
                });
            }
        }

        if let Some(setup) = self.setup.as_mut() {
            setup.placing = SetupPlacing::Road;
            setup.last_settlement = Some(vertex);
        }
        Ok(events)
    }

    pub fn place_setup_road(
        &mut self,
        player: PlayerId,
        edge: EdgeId,
    ) -> Result<Vec<GameEvent>, EngineError> {
        if !matches!(self.phase, Phase::SetupFirst | Phase::SetupSecond) {
            return Err(EngineError::WrongPhase);
        }
        self.ensure_current(player)?;
        let setup = self.setup.as_ref().ok_or(EngineError::WrongPhase)?;
        if setup.placing != SetupPlacing::Road {
            return Err(EngineError::WrongTurnPhase);
        }
        let anchor = setup.last_settlement.ok_or(EngineError::WrongTurnPhase)?;
        // The setup road must leave the settlement placed in this step.
        if !anchor.edges().contains(&edge) {
            return Err(EngineError::IllegalPlacement(
                "setup road must touch the settlement just placed".into(),
            ));
        }
        if !self.board.is_board_edge(&edge) || self.board.road_at(&edge).is_some() {
            return Err(EngineError::IllegalPlacement(format!(
                "cannot build a road at {edge}"
            )));
        }

        self.board.place_road(edge, player);
        self.players[player as usize].roads.push(edge);

        let mut events = vec![GameEvent::RoadBuilt { player, edge }];
        events.extend(self.advance_setup());
        Ok(events)
    }

    /// Move to the next setup step: forward through the order in the first
    /// round, backward in the second, then into normal play.
    fn advance_setup(&mut self) -> Vec<GameEvent> {
        let seat_count = self.players.len();
        let Some(setup) = self.setup.as_mut() else {
            return Vec::new();
        };
        setup.position += 1;
        setup.placing = SetupPlacing::Settlement;
        setup.last_settlement = None;
        let position = setup.position;

        match self.phase {
            Phase::SetupFirst if position >= seat_count => {
                self.phase = Phase::SetupSecond;
                if let Some(setup) = self.setup.as_mut() {
                    setup.position = 0;
                }
                self.current_player_index = seat_count - 1;
                vec![GameEvent::PhaseChanged {
                    phase: Phase::SetupSecond,
                }]
            }
            Phase::SetupFirst => {
                self.current_player_index = position;
                Vec::new()
            }
            Phase::SetupSecond if position >= seat_count => {
                self.phase = Phase::Playing;
                self.status = GameStatus::Playing;
                self.setup = None;
                self.current_player_index = 0;
                self.turn_number = 1;
                self.turn_phase = TurnPhase::PreRoll;
                vec![GameEvent::PhaseChanged {
                    phase: Phase::Playing,
                }]
            }
            Phase::SetupSecond => {
                self.current_player_index = seat_count - 1 - position;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    // ---- dice and production ----

    /// Resolve a turn roll with known dice. [`GameAction::RollDice`]
    /// samples the dice and delegates here.
    pub fn roll_dice_with(
        &mut self,
        player: PlayerId,
        d1: u8,
        d2: u8,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::PreRoll)?;
        self.ensure_current(player)?;

        let total = d1 + d2;
        self.last_dice_roll = Some((d1, d2));
        let mut events = vec![GameEvent::DiceRolled {
            player,
            roll: (d1, d2),
            total,
        }];

        if total == 7 {
            let pending: Vec<PendingDiscard> = self
                .players
                .iter()
                .filter(|p| p.resources.total() > DISCARD_THRESHOLD)
                .map(|p| PendingDiscard {
                    player: p.id,
                    count: p.resources.total() / 2,
                })
                .collect();
            if pending.is_empty() {
                self.turn_phase = TurnPhase::RobberMove;
                events.push(GameEvent::RobberActivated { player });
            } else {
                self.pending_discards = pending.clone();
                self.turn_phase = TurnPhase::Discard;
                events.push(GameEvent::DiscardRequired { pending });
            }
        } else {
            let (grants, withheld) = self.distribute_production(total);
            if !grants.is_empty() || !withheld.is_empty() {
                events.push(GameEvent::ResourcesDistributed { grants, withheld });
            }
            self.turn_phase = TurnPhase::Main;
        }
        Ok(events)
    }

    /// Pay out production for a roll under the bank-scarcity rule: a
    /// resource the bank cannot fully cover is withheld from everyone when
    /// more than one player is owed it; a sole recipient takes whatever is
    /// left.
    fn distribute_production(&mut self, roll: u8) -> (Vec<(PlayerId, Resource, u32)>, Vec<Resource>) {
        let entitlement = self.board.production_for_roll(roll);
        let mut per_resource: BTreeMap<Resource, Vec<(PlayerId, u32)>> = BTreeMap::new();
        for (player, grants) in &entitlement {
            for (resource, amount) in grants {
                per_resource
                    .entry(*resource)
                    .or_default()
                    .push((*player, *amount));
            }
        }

        let mut paid = Vec::new();
        let mut withheld = Vec::new();
        for (resource, recipients) in per_resource {
            let needed: u32 = recipients.iter().map(|(_, n)| n).sum();
            let available = self.bank.available(resource);
            if needed <= available {
                for (player, amount) in recipients {
                    self.bank.withdraw(resource, amount);
                    self.players[player as usize].resources.add(resource, amount);
                    paid.push((player, resource, amount));
                }
            } else if recipients.len() == 1 {
                let (player, amount) = recipients[0];
                let partial = amount.min(available);
                if partial > 0 {
                    self.bank.withdraw(resource, partial);
                    self.players[player as usize].resources.add(resource, partial);
                    paid.push((player, resource, partial));
                } else {
                    withheld.push(resource);
                }
            } else {
                withheld.push(resource);
            }
        }
        (paid, withheld)
    }

    // ---- robber sequence ----

    fn discard_resources(
        &mut self,
        player: PlayerId,
        counts: ResourceCount,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Discard)?;
        let position = self
            .pending_discards
            .iter()
            .position(|d| d.player == player)
            .ok_or(EngineError::InvalidDiscard)?;
        let required = self.pending_discards[position].count;
        if counts.total() != required {
            return Err(EngineError::InvalidDiscard);
        }
        if !self.players[player as usize].resources.try_subtract(&counts) {
            return Err(EngineError::InvalidDiscard);
        }
        self.bank.deposit_all(&counts);
        self.pending_discards.remove(position);

        let mut events = vec![GameEvent::ResourcesDiscarded {
            player,
            count: required,
        }];
        // The discard fence: the robber only moves once every debt is paid.
        if self.pending_discards.is_empty() {
            self.turn_phase = TurnPhase::RobberMove;
            events.push(GameEvent::RobberActivated {
                player: self.current_player_id(),
            });
        }
        Ok(events)
    }

    fn move_robber(&mut self, player: PlayerId, hex: HexId) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::RobberMove)?;
        self.ensure_current(player)?;
        if self.board.tile(&hex).is_none() {
            return Err(EngineError::IllegalPlacement(format!(
                "{hex} is not a board tile"
            )));
        }
        if hex == self.board.robber_hex() {
            return Err(EngineError::IllegalPlacement(
                "robber must move to a different tile".into(),
            ));
        }

        let from = self.board.robber_hex();
        self.board.move_robber(hex);
        let events = vec![GameEvent::RobberMoved {
            player,
            from,
            to: hex,
        }];

        let has_victims = self
            .board
            .players_adjacent_to_hex(&hex)
            .iter()
            .any(|&p| p != player);
        self.turn_phase = if has_victims {
            TurnPhase::RobberSteal
        } else {
            self.post_robber_turn_phase()
        };
        Ok(events)
    }

    fn steal_resource<R: Rng>(
        &mut self,
        player: PlayerId,
        victim: PlayerId,
        rng: &mut R,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::RobberSteal)?;
        self.ensure_current(player)?;
        if victim as usize >= self.players.len() {
            return Err(EngineError::UnknownPlayer);
        }
        let robber = self.board.robber_hex();
        let eligible = self.board.players_adjacent_to_hex(&robber);
        if victim == player || !eligible.contains(&victim) {
            return Err(EngineError::IllegalPlacement(
                "victim has no building on the robbed tile".into(),
            ));
        }

        let stolen = self.players[victim as usize].resources.take_random(rng);
        if let Some(resource) = stolen {
            self.players[player as usize].resources.add(resource, 1);
        }
        self.turn_phase = self.post_robber_turn_phase();
        Ok(vec![GameEvent::ResourceStolen {
            thief: player,
            victim,
            resource: stolen,
        }])
    }

    // ---- building ----

    fn build_settlement(
        &mut self,
        player: PlayerId,
        vertex: VertexId,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        if !self.board.settlement_placement_legal(&vertex, player, false) {
            return Err(EngineError::IllegalPlacement(format!(
                "cannot settle at {vertex}"
            )));
        }
        if self.players[player as usize].settlements_left() == 0 {
            return Err(EngineError::PieceExhausted);
        }
        let cost = costs::settlement();
        if !self.players[player as usize].resources.try_subtract(&cost) {
            return Err(EngineError::CannotAfford);
        }
        self.bank.deposit_all(&cost);

        self.board.place_settlement(vertex, player);
        let p = &mut self.players[player as usize];
        p.settlements.push(vertex);
        p.public_victory_points += 1;

        let mut events = vec![GameEvent::SettlementBuilt { player, vertex }];
        // A new settlement can cut an opponent's chain.
        events.extend(self.recompute_longest_road());
        Ok(events)
    }

    fn build_city(
        &mut self,
        player: PlayerId,
        vertex: VertexId,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        let owns_settlement = self
            .board
            .building_at(&vertex)
            .is_some_and(|b| b.owner == player && b.kind == crate::board::BuildingKind::Settlement);
        if !owns_settlement {
            return Err(EngineError::IllegalPlacement(format!(
                "no settlement of yours at {vertex}"
            )));
        }
        if self.players[player as usize].cities_left() == 0 {
            return Err(EngineError::PieceExhausted);
        }
        let cost = costs::city();
        if !self.players[player as usize].resources.try_subtract(&cost) {
            return Err(EngineError::CannotAfford);
        }
        self.bank.deposit_all(&cost);

        self.board.upgrade_to_city(vertex, player);
        let p = &mut self.players[player as usize];
        p.settlements.retain(|v| *v != vertex);
        p.cities.push(vertex);
        // The settlement's point stays; the upgrade adds one more.
        p.public_victory_points += 1;

        Ok(vec![GameEvent::CityBuilt { player, vertex }])
    }

    fn build_road(&mut self, player: PlayerId, edge: EdgeId) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        if !matches!(self.turn_phase, TurnPhase::Main | TurnPhase::RoadBuilding) {
            return Err(EngineError::WrongTurnPhase);
        }
        self.ensure_current(player)?;
        if !self.board.road_placement_legal(&edge, player) {
            return Err(EngineError::IllegalPlacement(format!(
                "cannot build a road at {edge}"
            )));
        }
        if self.players[player as usize].roads_left() == 0 {
            return Err(EngineError::PieceExhausted);
        }
        let free = self.turn_phase == TurnPhase::RoadBuilding;
        if !free {
            let cost = costs::road();
            if !self.players[player as usize].resources.try_subtract(&cost) {
                return Err(EngineError::CannotAfford);
            }
            self.bank.deposit_all(&cost);
        }

        self.board.place_road(edge, player);
        self.players[player as usize].roads.push(edge);

        let mut events = vec![GameEvent::RoadBuilt { player, edge }];
        if free {
            self.road_building_roads_placed += 1;
            let exhausted = self.road_building_roads_placed >= ROAD_BUILDING_ROADS
                || self.players[player as usize].roads_left() == 0
                || !self.board.has_legal_road_spot(player);
            if exhausted {
                self.turn_phase = TurnPhase::Main;
                self.road_building_roads_placed = 0;
            }
        }
        events.extend(self.recompute_longest_road());
        Ok(events)
    }

    // ---- development cards ----

    fn buy_dev_card(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        if self.deck.is_empty() {
            return Err(EngineError::DeckEmpty);
        }
        let cost = costs::dev_card();
        if !self.players[player as usize].resources.try_subtract(&cost) {
            return Err(EngineError::CannotAfford);
        }
        self.bank.deposit_all(&cost);

        let Some(kind) = self.deck.pop() else {
            return Err(EngineError::DeckEmpty);
        };
        self.dev_card_deck_count -= 1;
        let card = DevCard {
            id: self.next_dev_card_id,
            kind,
            purchased_on_turn: self.turn_number,
            played: false,
        };
        self.next_dev_card_id += 1;
        self.players[player as usize].dev_cards.push(card);

        Ok(vec![GameEvent::DevCardPurchased {
            player,
            remaining: self.dev_card_deck_count,
        }])
    }

    /// Shared gate for playing a card: one per turn, never on the turn it
    /// was bought. Consumes the card on success.
    fn take_playable_card(
        &mut self,
        player: PlayerId,
        kind: DevCardKind,
    ) -> Result<(), EngineError> {
        if self.dev_card_played_this_turn {
            return Err(EngineError::CardUnavailable);
        }
        if !self.players[player as usize].play_dev_card(kind, self.turn_number) {
            return Err(EngineError::CardUnavailable);
        }
        self.dev_card_played_this_turn = true;
        Ok(())
    }

    fn play_knight(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        // The knight is the one card playable before the roll.
        if !matches!(self.turn_phase, TurnPhase::PreRoll | TurnPhase::Main) {
            return Err(EngineError::WrongTurnPhase);
        }
        self.ensure_current(player)?;
        self.take_playable_card(player, DevCardKind::Knight)?;
        self.players[player as usize].knights_played += 1;

        let mut events = vec![GameEvent::DevCardPlayed {
            player,
            kind: DevCardKind::Knight,
            gained: None,
            monopolized: None,
            total_taken: None,
        }];
        events.extend(self.recompute_largest_army());
        self.turn_phase = TurnPhase::RobberMove;
        events.push(GameEvent::RobberActivated { player });
        Ok(events)
    }

    fn play_road_building(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        self.take_playable_card(player, DevCardKind::RoadBuilding)?;

        let events = vec![GameEvent::DevCardPlayed {
            player,
            kind: DevCardKind::RoadBuilding,
            gained: None,
            monopolized: None,
            total_taken: None,
        }];
        // Stay in main if there is nothing to place; the card is spent
        // either way.
        if self.players[player as usize].roads_left() > 0
            && self.board.has_legal_road_spot(player)
        {
            self.turn_phase = TurnPhase::RoadBuilding;
            self.road_building_roads_placed = 0;
        }
        Ok(events)
    }

    fn play_year_of_plenty(
        &mut self,
        player: PlayerId,
        first: Resource,
        second: Resource,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        // Verify the bank before consuming the card.
        let mut wanted = ResourceCount::new();
        wanted.add(first, 1);
        wanted.add(second, 1);
        for (resource, amount) in wanted.iter() {
            if self.bank.available(resource) < amount {
                return Err(EngineError::BankShortage);
            }
        }
        self.take_playable_card(player, DevCardKind::YearOfPlenty)?;

        self.turn_phase = TurnPhase::YearOfPlenty;
        for (resource, amount) in wanted.iter() {
            self.bank.withdraw(resource, amount);
        }
        self.players[player as usize].resources.add_all(&wanted);
        self.turn_phase = TurnPhase::Main;

        Ok(vec![GameEvent::DevCardPlayed {
            player,
            kind: DevCardKind::YearOfPlenty,
            gained: Some(wanted),
            monopolized: None,
            total_taken: None,
        }])
    }

    fn play_monopoly(
        &mut self,
        player: PlayerId,
        resource: Resource,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        self.take_playable_card(player, DevCardKind::Monopoly)?;

        self.turn_phase = TurnPhase::Monopoly;
        let mut total_taken = 0;
        for other in &mut self.players {
            if other.id != player {
                let held = other.resources.get(resource);
                other.resources.set(resource, 0);
                total_taken += held;
            }
        }
        self.players[player as usize].resources.add(resource, total_taken);
        self.turn_phase = TurnPhase::Main;

        Ok(vec![GameEvent::DevCardPlayed {
            player,
            kind: DevCardKind::Monopoly,
            gained: None,
            monopolized: Some(resource),
            total_taken: Some(total_taken),
        }])
    }

    // ---- trading ----

    fn propose_trade(
        &mut self,
        player: PlayerId,
        to: Option<PlayerId>,
        offering: ResourceCount,
        requesting: ResourceCount,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        if self.active_trade.is_some() {
            return Err(EngineError::InvalidTrade);
        }
        if offering.is_empty() || requesting.is_empty() || to == Some(player) {
            return Err(EngineError::InvalidTrade);
        }
        if let Some(target) = to {
            if target as usize >= self.players.len() {
                return Err(EngineError::UnknownPlayer);
            }
        }
        if !self.players[player as usize].resources.can_afford(&offering) {
            return Err(EngineError::CannotAfford);
        }

        let trade = TradeProposal {
            id: self.next_trade_id,
            from: player,
            to,
            offering,
            requesting,
            proposed_on_turn: self.turn_number,
        };
        self.next_trade_id += 1;
        self.active_trade = Some(trade.clone());
        Ok(vec![GameEvent::TradeProposed { trade }])
    }

    fn accept_trade(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        let trade = self
            .active_trade
            .clone()
            .ok_or(EngineError::NoActiveTrade)?;
        if player == trade.from {
            return Err(EngineError::InvalidTrade);
        }
        if trade.to.is_some_and(|t| t != player) {
            return Err(EngineError::NotYourTurn);
        }
        // Both sides must still be able to pay at acceptance time.
        if !self.players[trade.from as usize]
            .resources
            .can_afford(&trade.offering)
            || !self.players[player as usize]
                .resources
                .can_afford(&trade.requesting)
        {
            return Err(EngineError::CannotAfford);
        }

        self.players[trade.from as usize]
            .resources
            .try_subtract(&trade.offering);
        self.players[player as usize]
            .resources
            .try_subtract(&trade.requesting);
        self.players[trade.from as usize]
            .resources
            .add_all(&trade.requesting);
        self.players[player as usize]
            .resources
            .add_all(&trade.offering);
        self.active_trade = None;

        Ok(vec![GameEvent::TradeCompleted {
            trade_id: trade.id,
            from: trade.from,
            to: player,
        }])
    }

    fn reject_trade(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        let trade = self.active_trade.as_ref().ok_or(EngineError::NoActiveTrade)?;
        if player == trade.from {
            return Err(EngineError::InvalidTrade);
        }
        if trade.to.is_some_and(|t| t != player) {
            return Err(EngineError::NotYourTurn);
        }
        let mut events = vec![GameEvent::TradeRejected { player }];
        // A directed trade dies with its target's rejection; an open one
        // stays up for others until cancelled or expired.
        if trade.to == Some(player) {
            self.active_trade = None;
            events.push(GameEvent::TradeCancelled);
        }
        Ok(events)
    }

    fn cancel_trade(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        let trade = self.active_trade.as_ref().ok_or(EngineError::NoActiveTrade)?;
        if trade.from != player {
            return Err(EngineError::NotYourTurn);
        }
        self.active_trade = None;
        Ok(vec![GameEvent::TradeCancelled])
    }

    /// Expire the active trade, if any. Driven by the session layer's
    /// clock; the engine itself is time-free.
    pub fn expire_active_trade(&mut self) -> Option<GameEvent> {
        self.active_trade.take().map(|_| GameEvent::TradeExpired)
    }

    fn harbor_trade(
        &mut self,
        player: PlayerId,
        give: Resource,
        receive: Resource,
    ) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;
        if give == receive {
            return Err(EngineError::InvalidTrade);
        }
        let rate = self.board.trade_rate(player, give);
        let cost = ResourceCount::single(give, rate);
        if !self.players[player as usize].resources.can_afford(&cost) {
            return Err(EngineError::CannotAfford);
        }
        if self.bank.available(receive) < 1 {
            return Err(EngineError::BankShortage);
        }

        self.players[player as usize].resources.try_subtract(&cost);
        self.bank.deposit(give, rate);
        self.bank.withdraw(receive, 1);
        self.players[player as usize].resources.add(receive, 1);

        Ok(vec![GameEvent::HarborTradeCompleted {
            player,
            gave: give,
            gave_count: rate,
            received: receive,
        }])
    }

    // ---- turn management ----

    fn end_turn(&mut self, player: PlayerId) -> Result<Vec<GameEvent>, EngineError> {
        self.ensure_playing()?;
        self.ensure_turn_phase(TurnPhase::Main)?;
        self.ensure_current(player)?;

        let mut events = Vec::new();
        if self.active_trade.take().is_some() {
            events.push(GameEvent::TradeCancelled);
        }

        self.current_player_index = (self.current_player_index + 1) % self.players.len();
        if self.current_player_index == 0 {
            self.turn_number += 1;
        }
        self.turn_phase = TurnPhase::PreRoll;
        self.last_dice_roll = None;
        self.dev_card_played_this_turn = false;
        self.road_building_roads_placed = 0;

        events.push(GameEvent::TurnEnded {
            player,
            next_player: self.current_player_id(),
            turn_number: self.turn_number,
        });
        Ok(events)
    }

    /// Flip a player's connection flag. Returns the event when the flag
    /// actually changed.
    pub fn set_connected(&mut self, player: PlayerId, connected: bool) -> Option<GameEvent> {
        let p = self.players.get_mut(player as usize)?;
        if p.is_connected == connected {
            return None;
        }
        p.is_connected = connected;
        Some(if connected {
            GameEvent::PlayerReconnected { player }
        } else {
            GameEvent::PlayerDisconnected { player }
        })
    }

    // ---- achievements and victory ----

    /// Recompute longest-road lengths and move the award. Idempotent.
    /// The award needs length ≥ 5, transfers only on strict excess, and is
    /// vacated (then possibly re-granted) when the holder's chain is cut
    /// below 5. Ties never move it.
    fn recompute_longest_road(&mut self) -> Vec<GameEvent> {
        for i in 0..self.players.len() {
            let id = self.players[i].id;
            self.players[i].longest_road_length = self.board.longest_road(id);
        }

        let previous = self.longest_road_holder;
        let mut holder = previous;
        if let Some(h) = holder {
            if self.players[h as usize].longest_road_length < LONGEST_ROAD_MIN {
                holder = None;
            }
        }
        let floor = holder
            .map(|h| self.players[h as usize].longest_road_length)
            .unwrap_or(LONGEST_ROAD_MIN - 1);
        if let Some(best) = self
            .players
            .iter()
            .map(|p| p.longest_road_length)
            .filter(|&len| len > floor)
            .max()
        {
            let mut leaders = self
                .players
                .iter()
                .filter(|p| p.longest_road_length == best);
            if let (Some(leader), None) = (leaders.next(), leaders.next()) {
                holder = Some(leader.id);
            }
        }

        if holder != previous {
            if let Some(prev) = previous {
                let p = &mut self.players[prev as usize];
                p.has_longest_road = false;
                p.public_victory_points -= 2;
            }
            if let Some(cur) = holder {
                let p = &mut self.players[cur as usize];
                p.has_longest_road = true;
                p.public_victory_points += 2;
            }
            self.longest_road_holder = holder;
        }
        self.longest_road_length = holder
            .map(|h| self.players[h as usize].longest_road_length)
            .unwrap_or(0);

        if holder != previous {
            vec![GameEvent::LongestRoadChanged {
                previous,
                current: holder,
                length: self.longest_road_length,
            }]
        } else {
            Vec::new()
        }
    }

    /// Recompute the largest-army award. Knights never decrease, so the
    /// award is never vacated; it moves only on strict excess at ≥ 3.
    fn recompute_largest_army(&mut self) -> Vec<GameEvent> {
        let previous = self.largest_army_holder;
        let mut holder = previous;
        let floor = holder
            .map(|h| self.players[h as usize].knights_played)
            .unwrap_or(LARGEST_ARMY_MIN - 1);
        if let Some(best) = self
            .players
            .iter()
            .map(|p| p.knights_played)
            .filter(|&k| k > floor)
            .max()
        {
            let mut leaders = self.players.iter().filter(|p| p.knights_played == best);
            if let (Some(leader), None) = (leaders.next(), leaders.next()) {
                holder = Some(leader.id);
            }
        }

        if holder != previous {
            if let Some(prev) = previous {
                let p = &mut self.players[prev as usize];
                p.has_largest_army = false;
                p.public_victory_points -= 2;
            }
            if let Some(cur) = holder {
                let p = &mut self.players[cur as usize];
                p.has_largest_army = true;
                p.public_victory_points += 2;
            }
            self.largest_army_holder = holder;
        }
        self.largest_army_size = holder
            .map(|h| self.players[h as usize].knights_played)
            .unwrap_or(0);

        if holder != previous {
            vec![GameEvent::LargestArmyChanged {
                previous,
                current: holder,
                size: self.largest_army_size,
            }]
        } else {
            Vec::new()
        }
    }

    /// Declare a winner once anyone's total (public plus hidden cards)
    /// reaches ten. The active player wins a simultaneous crossing.
    fn check_winner(&mut self) -> Vec<GameEvent> {
        if self.winner.is_some() {
            return Vec::new();
        }
        let over = |p: PlayerId| {
            self.players[p as usize].total_victory_points() >= VICTORY_POINTS_TO_WIN
        };
        let current = self.current_player_id();
        let winner = if over(current) {
            Some(current)
        } else {
            self.turn_order.iter().copied().find(|&p| over(p))
        };
        let Some(winner) = winner else {
            return Vec::new();
        };

        self.winner = Some(winner);
        self.status = GameStatus::Finished;
        self.phase = Phase::Finished;
        vec![GameEvent::GameWon {
            player: winner,
            victory_points: self.players[winner as usize].total_victory_points(),
        }]
    }

    // ---- consistency checks ----

    /// Verify the structural invariants that must hold after every
    /// successful command. Test and debugging aid.
    pub fn check_invariants(&self) -> Result<(), String> {
        let mut award_points = 0;
        for p in &self.players {
            if p.settlements.len() > crate::player::MAX_SETTLEMENTS {
                return Err(format!("player {} exceeds settlement limit", p.id));
            }
            if p.cities.len() > crate::player::MAX_CITIES {
                return Err(format!("player {} exceeds city limit", p.id));
            }
            if p.roads.len() > crate::player::MAX_ROADS {
                return Err(format!("player {} exceeds road limit", p.id));
            }
            let expected = p.settlements.len() as u32
                + 2 * p.cities.len() as u32
                + if p.has_longest_road { 2 } else { 0 }
                + if p.has_largest_army { 2 } else { 0 };
            if p.public_victory_points != expected {
                return Err(format!(
                    "player {} public VP {} != derived {}",
                    p.id, p.public_victory_points, expected
                ));
            }
            if p.has_longest_road {
                award_points += 1;
            }
            if p.has_largest_army {
                award_points += 1;
            }

            for v in &p.settlements {
                let ok = self.board.building_at(v).is_some_and(|b| {
                    b.owner == p.id && b.kind == crate::board::BuildingKind::Settlement
                });
                if !ok {
                    return Err(format!("player {} settlement list desynced at {v}", p.id));
                }
            }
            for v in &p.cities {
                let ok = self
                    .board
                    .building_at(v)
                    .is_some_and(|b| b.owner == p.id && b.kind == crate::board::BuildingKind::City);
                if !ok {
                    return Err(format!("player {} city list desynced at {v}", p.id));
                }
            }
            for e in &p.roads {
                if !self.board.road_at(e).is_some_and(|r| r.owner == p.id) {
                    return Err(format!("player {} road list desynced at {e}", p.id));
                }
            }
        }
        if award_points > 2 {
            return Err("more than one holder per achievement".into());
        }

        // The distance rule must survive every mutation.
        for building in self.board.buildings() {
            for adj in building.vertex.adjacent_vertices() {
                if self.board.building_at(&adj).is_some() {
                    return Err(format!(
                        "adjacent buildings at {} and {adj}",
                        building.vertex
                    ));
                }
            }
        }

        let held: u32 = self
            .players
            .iter()
            .map(|p| p.dev_cards.len() as u32)
            .sum();
        if self.dev_card_deck_count + held != 25 {
            return Err(format!(
                "deck {} + hands {held} != 25",
                self.dev_card_deck_count
            ));
        }
        if self.deck.len() as u32 != self.dev_card_deck_count {
            return Err("deck count field desynced".into());
        }

        // Bank conservation, per resource.
        for r in Resource::ALL {
            let in_hands: u32 = self.players.iter().map(|p| p.resources.get(r)).sum();
            if self.bank.available(r) + in_hands != crate::resources::BANK_SUPPLY_PER_RESOURCE {
                return Err(format!("resource {r:?} not conserved"));
            }
        }

        let discard_fence_up = !self.pending_discards.is_empty();
        if discard_fence_up != (self.turn_phase == TurnPhase::Discard && self.phase == Phase::Playing)
        {
            return Err("pending discards out of sync with turn phase".into());
        }

        if (self.phase == Phase::Finished) != self.winner.is_some() {
            return Err("finished phase out of sync with winner".into());
        }
        Ok(())
    }
}
