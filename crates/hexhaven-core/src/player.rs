//! Per-player state: pieces, resources, development cards, achievements.

use crate::hex::{EdgeId, VertexId};
use crate::resources::ResourceCount;
use serde::{Deserialize, Serialize};

/// Seat index within a game (0-3). Stable for the whole game; the server
/// maps connection identities onto seats.
pub type PlayerId = u8;

/// Piece pool limits per player.
pub const MAX_SETTLEMENTS: usize = 5;
pub const MAX_CITIES: usize = 4;
pub const MAX_ROADS: usize = 15;

/// Player color, unique within a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    Red,
    Blue,
    Orange,
    White,
}

impl PlayerColor {
    pub const ALL: [PlayerColor; 4] = [
        PlayerColor::Red,
        PlayerColor::Blue,
        PlayerColor::Orange,
        PlayerColor::White,
    ];
}

/// The five development card kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevCardKind {
    Knight,
    VictoryPoint,
    RoadBuilding,
    YearOfPlenty,
    Monopoly,
}

impl DevCardKind {
    /// Victory point cards are never actively played.
    pub fn is_playable(&self) -> bool {
        !matches!(self, DevCardKind::VictoryPoint)
    }

    /// The canonical 25-card deck, unshuffled.
    pub fn standard_deck() -> Vec<DevCardKind> {
        let mut deck = Vec::with_capacity(25);
        deck.extend(std::iter::repeat(DevCardKind::Knight).take(14));
        deck.extend(std::iter::repeat(DevCardKind::VictoryPoint).take(5));
        deck.extend(std::iter::repeat(DevCardKind::RoadBuilding).take(2));
        deck.extend(std::iter::repeat(DevCardKind::YearOfPlenty).take(2));
        deck.extend(std::iter::repeat(DevCardKind::Monopoly).take(2));
        deck
    }
}

/// A development card held by a player. Played cards stay in the hand with
/// `played` set, so the deck-plus-hands total stays at 25.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevCard {
    pub id: u32,
    pub kind: DevCardKind,
    pub purchased_on_turn: u32,
    pub played: bool,
}

/// One player's complete state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    /// Seat index within the game.
    pub id: PlayerId,
    /// Opaque account identity supplied by the gateway.
    pub user_id: String,
    pub username: String,
    pub color: PlayerColor,
    pub resources: ResourceCount,
    pub dev_cards: Vec<DevCard>,
    /// Vertices holding this player's settlements.
    pub settlements: Vec<VertexId>,
    /// Vertices holding this player's cities.
    pub cities: Vec<VertexId>,
    /// Edges holding this player's roads.
    pub roads: Vec<EdgeId>,
    pub knights_played: u32,
    pub longest_road_length: u32,
    pub has_longest_road: bool,
    pub has_largest_army: bool,
    /// Victory points visible to everyone: buildings plus achievement
    /// awards. Hidden VP cards are not included.
    pub public_victory_points: u32,
    pub is_connected: bool,
}

impl PlayerState {
    pub fn new(id: PlayerId, user_id: String, username: String, color: PlayerColor) -> Self {
        Self {
            id,
            user_id,
            username,
            color,
            resources: ResourceCount::new(),
            dev_cards: Vec::new(),
            settlements: Vec::new(),
            cities: Vec::new(),
            roads: Vec::new(),
            knights_played: 0,
            longest_road_length: 0,
            has_longest_road: false,
            has_largest_army: false,
            public_victory_points: 0,
            is_connected: true,
        }
    }

    pub fn settlements_left(&self) -> usize {
        MAX_SETTLEMENTS - self.settlements.len()
    }

    pub fn cities_left(&self) -> usize {
        MAX_CITIES - self.cities.len()
    }

    pub fn roads_left(&self) -> usize {
        MAX_ROADS - self.roads.len()
    }

    /// Victory points from hidden VP cards.
    pub fn hidden_victory_points(&self) -> u32 {
        self.dev_cards
            .iter()
            .filter(|c| c.kind == DevCardKind::VictoryPoint)
            .count() as u32
    }

    /// Public plus hidden points; the winner check runs on this.
    pub fn total_victory_points(&self) -> u32 {
        self.public_victory_points + self.hidden_victory_points()
    }

    /// An unplayed card of `kind` bought before `current_turn`, if any.
    pub fn playable_dev_card(&self, kind: DevCardKind, current_turn: u32) -> Option<&DevCard> {
        self.dev_cards.iter().find(|c| {
            c.kind == kind && !c.played && c.kind.is_playable() && c.purchased_on_turn < current_turn
        })
    }

    /// Mark one playable card of `kind` as played. Returns false if none
    /// qualifies.
    pub fn play_dev_card(&mut self, kind: DevCardKind, current_turn: u32) -> bool {
        let card = self.dev_cards.iter_mut().find(|c| {
            c.kind == kind && !c.played && c.kind.is_playable() && c.purchased_on_turn < current_turn
        });
        match card {
            Some(card) => {
                card.played = true;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> PlayerState {
        PlayerState::new(0, "user-1".into(), "Alice".into(), PlayerColor::Red)
    }

    #[test]
    fn standard_deck_distribution() {
        let deck = DevCardKind::standard_deck();
        assert_eq!(deck.len(), 25);
        let count = |k: DevCardKind| deck.iter().filter(|c| **c == k).count();
        assert_eq!(count(DevCardKind::Knight), 14);
        assert_eq!(count(DevCardKind::VictoryPoint), 5);
        assert_eq!(count(DevCardKind::RoadBuilding), 2);
        assert_eq!(count(DevCardKind::YearOfPlenty), 2);
        assert_eq!(count(DevCardKind::Monopoly), 2);
    }

    #[test]
    fn fresh_player_has_full_piece_pool() {
        let p = player();
        assert_eq!(p.settlements_left(), 5);
        assert_eq!(p.cities_left(), 4);
        assert_eq!(p.roads_left(), 15);
        assert_eq!(p.total_victory_points(), 0);
    }

    #[test]
    fn dev_card_not_playable_on_purchase_turn() {
        let mut p = player();
        p.dev_cards.push(DevCard {
            id: 1,
            kind: DevCardKind::Knight,
            purchased_on_turn: 3,
            played: false,
        });

        assert!(p.playable_dev_card(DevCardKind::Knight, 3).is_none());
        assert!(p.playable_dev_card(DevCardKind::Knight, 4).is_some());
        assert!(p.play_dev_card(DevCardKind::Knight, 4));
        // Already played; the card stays in hand but is spent.
        assert!(!p.play_dev_card(DevCardKind::Knight, 5));
        assert_eq!(p.dev_cards.len(), 1);
    }

    #[test]
    fn victory_point_cards_are_hidden_but_counted() {
        let mut p = player();
        p.dev_cards.push(DevCard {
            id: 1,
            kind: DevCardKind::VictoryPoint,
            purchased_on_turn: 1,
            played: false,
        });
        p.public_victory_points = 2;

        assert_eq!(p.hidden_victory_points(), 1);
        assert_eq!(p.total_victory_points(), 3);
        // VP cards can never be played, regardless of turn.
        assert!(p.playable_dev_card(DevCardKind::VictoryPoint, 99).is_none());
        assert!(!p.play_dev_card(DevCardKind::VictoryPoint, 99));
    }
}
