//! Player actions and the events they produce.
//!
//! Events serialize with the wire names clients subscribe to, tagged the
//! same way as the protocol envelope, so the server can forward them
//! verbatim.

use crate::hex::{EdgeId, HexId, VertexId};
use crate::player::{DevCardKind, PlayerId};
use crate::resources::{Resource, ResourceCount};
use serde::{Deserialize, Serialize};

/// Everything a player can ask the engine to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameAction {
    /// Roll once to determine turn order (seating order, one roll each).
    RollForOrder,
    /// Place a settlement during a setup round.
    PlaceSetupSettlement(VertexId),
    /// Place the road attached to the settlement just placed.
    PlaceSetupRoad(EdgeId),
    /// Roll the dice at the start of a turn.
    RollDice,
    /// Discard the required half of an oversized hand after a seven.
    DiscardResources(ResourceCount),
    /// Move the robber after a seven or a knight.
    MoveRobber(HexId),
    /// Steal one random card from an adjacent victim.
    StealResource { victim: PlayerId },
    BuildSettlement(VertexId),
    BuildCity(VertexId),
    BuildRoad(EdgeId),
    BuyDevCard,
    PlayKnight,
    PlayRoadBuilding,
    PlayYearOfPlenty(Resource, Resource),
    PlayMonopoly(Resource),
    ProposeTrade {
        to: Option<PlayerId>,
        offering: ResourceCount,
        requesting: ResourceCount,
    },
    AcceptTrade,
    RejectTrade,
    CancelTrade,
    /// Trade with the bank at the best port rate (4:1, 3:1, or 2:1).
    HarborTrade { give: Resource, receive: Resource },
    EndTurn,
}

/// A pending domestic trade. At most one exists per game; the session
/// layer expires it after 60 seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub id: u32,
    pub from: PlayerId,
    /// Directed at one player, or open to everyone when `None`.
    pub to: Option<PlayerId>,
    pub offering: ResourceCount,
    pub requesting: ResourceCount,
    pub proposed_on_turn: u32,
}

/// A player who still owes a discard, and how many cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDiscard {
    pub player: PlayerId,
    pub count: u32,
}

/// Events emitted by successful state transitions, in wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum GameEvent {
    #[serde(rename = "game:roll_for_order_result")]
    OrderRolled {
        player: PlayerId,
        roll: (u8, u8),
        total: u8,
    },

    #[serde(rename = "game:phase_changed")]
    PhaseChanged { phase: crate::game::Phase },

    #[serde(rename = "dice:rolled")]
    DiceRolled {
        player: PlayerId,
        roll: (u8, u8),
        total: u8,
    },

    /// Production after a non-seven roll. `withheld` lists resources no
    /// one received because the bank could not pay every recipient.
    #[serde(rename = "dice:resources_distributed")]
    ResourcesDistributed {
        grants: Vec<(PlayerId, Resource, u32)>,
        withheld: Vec<Resource>,
    },

    #[serde(rename = "robber:activated")]
    RobberActivated { player: PlayerId },

    #[serde(rename = "robber:discard_required")]
    DiscardRequired { pending: Vec<PendingDiscard> },

    #[serde(rename = "robber:player_discarded")]
    ResourcesDiscarded { player: PlayerId, count: u32 },

    #[serde(rename = "robber:moved")]
    RobberMoved {
        player: PlayerId,
        from: HexId,
        to: HexId,
    },

    /// `resource` is `None` when nothing could be stolen; the session
    /// layer also blanks it for everyone but thief and victim.
    #[serde(rename = "robber:steal")]
    ResourceStolen {
        thief: PlayerId,
        victim: PlayerId,
        resource: Option<Resource>,
    },

    #[serde(rename = "build:settlement_placed")]
    SettlementBuilt { player: PlayerId, vertex: VertexId },

    #[serde(rename = "build:city_placed")]
    CityBuilt { player: PlayerId, vertex: VertexId },

    #[serde(rename = "build:road_placed")]
    RoadBuilt { player: PlayerId, edge: EdgeId },

    /// The card kind stays hidden until played.
    #[serde(rename = "devcard:purchased")]
    DevCardPurchased { player: PlayerId, remaining: u32 },

    #[serde(rename = "devcard:played")]
    DevCardPlayed {
        player: PlayerId,
        kind: DevCardKind,
        /// Year of plenty: what the bank paid out.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        gained: Option<ResourceCount>,
        /// Monopoly: the named resource and how many cards moved.
        #[serde(skip_serializing_if = "Option::is_none", default)]
        monopolized: Option<Resource>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        total_taken: Option<u32>,
    },

    #[serde(rename = "trade:proposed")]
    TradeProposed { trade: TradeProposal },

    #[serde(rename = "trade:completed")]
    TradeCompleted {
        trade_id: u32,
        from: PlayerId,
        to: PlayerId,
    },

    #[serde(rename = "trade:rejected")]
    TradeRejected { player: PlayerId },

    #[serde(rename = "trade:cancelled")]
    TradeCancelled,

    #[serde(rename = "trade:expired")]
    TradeExpired,

    #[serde(rename = "trade:maritime_completed")]
    HarborTradeCompleted {
        player: PlayerId,
        gave: Resource,
        gave_count: u32,
        received: Resource,
    },

    #[serde(rename = "achievement:longest_road")]
    LongestRoadChanged {
        previous: Option<PlayerId>,
        current: Option<PlayerId>,
        length: u32,
    },

    #[serde(rename = "achievement:largest_army")]
    LargestArmyChanged {
        previous: Option<PlayerId>,
        current: Option<PlayerId>,
        size: u32,
    },

    #[serde(rename = "game:turn_changed")]
    TurnEnded {
        player: PlayerId,
        next_player: PlayerId,
        turn_number: u32,
    },

    #[serde(rename = "game:ended")]
    GameWon {
        player: PlayerId,
        victory_points: u32,
    },

    #[serde(rename = "player:disconnected")]
    PlayerDisconnected { player: PlayerId },

    #[serde(rename = "player:reconnected")]
    PlayerReconnected { player: PlayerId },
}
