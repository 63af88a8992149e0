//! Hexhaven game engine.
//!
//! The authoritative core of an online hex-based resource-trading game for
//! 2-4 players. The server owns all randomness and validation; clients are
//! untrusted views that submit intents and receive events.
//!
//! # Modules
//!
//! - [`hex`]: axial coordinates and the string identities of tiles,
//!   vertices, and edges
//! - [`board`]: board tables, the randomized generator, placement rules,
//!   production, longest-road search
//! - [`resources`]: resource counts, building costs, the bank
//! - [`player`]: per-player state and development cards
//! - [`actions`]: the action/event vocabulary
//! - [`game`]: the game state and its transitions
//!
//! The engine is synchronous and allocation-light; the multiplayer server
//! wraps one [`game::GameState`] per session behind an actor task.

pub mod actions;
pub mod board;
pub mod game;
pub mod hex;
pub mod player;
pub mod resources;

pub use actions::{GameAction, GameEvent, PendingDiscard, TradeProposal};
pub use board::{Board, Building, BuildingKind, HexTile, Port, PortKind, Road, Terrain};
pub use game::{
    EngineError, GameState, GameStatus, Phase, PlayerSeat, RollForOrderState, SetupPlacing,
    SetupState, TurnPhase,
};
pub use hex::{AxialCoord, EdgeId, HexError, HexId, VertexId};
pub use player::{DevCard, DevCardKind, PlayerColor, PlayerId, PlayerState};
pub use resources::{Bank, Resource, ResourceCount};
