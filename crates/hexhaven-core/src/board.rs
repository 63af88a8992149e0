//! The game board: tiles, buildings, roads, ports, and the robber.
//!
//! The board is stored as flat tables keyed by the derived string IDs from
//! [`crate::hex`] — tiles in canonical spiral order, buildings and roads in
//! ordered maps. Adjacency is recomputed from geometry on demand; there are
//! no pointer graphs and no geometric coordinates in the public surface
//! beyond the tiles' own positions.

use crate::hex::{AxialCoord, EdgeId, HexId, VertexId};
use crate::player::PlayerId;
use crate::resources::Resource;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// Radius of the standard board (19 tiles).
pub const BOARD_RADIUS: u32 = 2;

/// Number of land tiles on a standard board.
pub const TILE_COUNT: usize = 19;

/// Number of ports on a standard board.
pub const PORT_COUNT: usize = 9;

/// Reshuffle attempts before accepting a board that keeps 6 and 8 apart.
const BALANCE_ATTEMPTS: usize = 100;

/// Indices into the angle-ordered list of the 30 coastal edges where ports
/// sit. Fixed positions; only the port types are shuffled over them.
const PORT_ANCHORS: [usize; PORT_COUNT] = [0, 3, 7, 10, 13, 17, 20, 23, 27];

/// Terrain of a hex tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Terrain {
    Desert,
    Hills,
    Mountains,
    Forest,
    Pasture,
    Fields,
}

impl Terrain {
    /// The resource this terrain produces, if any.
    pub fn resource(&self) -> Option<Resource> {
        match self {
            Terrain::Desert => None,
            Terrain::Hills => Some(Resource::Brick),
            Terrain::Mountains => Some(Resource::Ore),
            Terrain::Forest => Some(Resource::Lumber),
            Terrain::Pasture => Some(Resource::Wool),
            Terrain::Fields => Some(Resource::Grain),
        }
    }

    /// The canonical 19-tile terrain multiset.
    fn standard_multiset() -> Vec<Terrain> {
        let mut tiles = Vec::with_capacity(TILE_COUNT);
        tiles.push(Terrain::Desert);
        tiles.extend(std::iter::repeat(Terrain::Hills).take(3));
        tiles.extend(std::iter::repeat(Terrain::Mountains).take(3));
        tiles.extend(std::iter::repeat(Terrain::Forest).take(4));
        tiles.extend(std::iter::repeat(Terrain::Pasture).take(4));
        tiles.extend(std::iter::repeat(Terrain::Fields).take(4));
        tiles
    }
}

/// The canonical 18-token number multiset (no 7; one each of 2 and 12).
fn standard_number_tokens() -> Vec<u8> {
    vec![2, 3, 3, 4, 4, 5, 5, 6, 6, 8, 8, 9, 9, 10, 10, 11, 11, 12]
}

/// One hex tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HexTile {
    pub id: HexId,
    pub coord: AxialCoord,
    pub terrain: Terrain,
    /// `None` exactly for the desert.
    pub number_token: Option<u8>,
}

/// Port exchange type: 3:1 generic or 2:1 for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Generic,
    Resource(Resource),
}

impl PortKind {
    pub fn rate(&self) -> u32 {
        match self {
            PortKind::Generic => 3,
            PortKind::Resource(_) => 2,
        }
    }
}

impl Serialize for PortKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PortKind::Generic => serializer.serialize_str("generic"),
            PortKind::Resource(r) => r.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PortKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "generic" => Ok(PortKind::Generic),
            "brick" => Ok(PortKind::Resource(Resource::Brick)),
            "lumber" => Ok(PortKind::Resource(Resource::Lumber)),
            "ore" => Ok(PortKind::Resource(Resource::Ore)),
            "grain" => Ok(PortKind::Resource(Resource::Grain)),
            "wool" => Ok(PortKind::Resource(Resource::Wool)),
            other => Err(D::Error::custom(format!("unknown port kind: {other}"))),
        }
    }
}

/// A trade port on the coast. A player with a building on either vertex
/// trades at the port's rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: PortKind,
    pub vertices: [VertexId; 2],
    /// Angle of the port around the board center, degrees in `[0, 360)`.
    pub angle: f64,
}

/// Building kind on a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingKind {
    Settlement,
    City,
}

impl BuildingKind {
    /// Resources produced per adjacent tile activation.
    pub fn production(&self) -> u32 {
        match self {
            BuildingKind::Settlement => 1,
            BuildingKind::City => 2,
        }
    }
}

/// A settlement or city on a vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Building {
    pub vertex: VertexId,
    pub owner: PlayerId,
    pub kind: BuildingKind,
}

/// A road on an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Road {
    pub edge: EdgeId,
    pub owner: PlayerId,
}

/// The complete board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Board {
    /// The 19 land tiles in canonical spiral order around the origin.
    tiles: Vec<HexTile>,
    /// Buildings keyed by vertex ID.
    buildings: BTreeMap<VertexId, Building>,
    /// Roads keyed by edge ID.
    roads: BTreeMap<EdgeId, Road>,
    ports: Vec<Port>,
    robber_hex: HexId,
    /// False when 100 reshuffles could not separate all 6/8 tokens.
    balanced: bool,
}

impl Board {
    /// Generate a randomized standard board.
    ///
    /// Terrain and number tokens are shuffled together until no two 6/8
    /// tokens are cube-adjacent; after [`BALANCE_ATTEMPTS`] failures the
    /// last layout is kept and the board is flagged unbalanced rather than
    /// failing.
    pub fn generate<R: Rng>(rng: &mut R) -> Board {
        let coords = AxialCoord::spiral(AxialCoord::new(0, 0), BOARD_RADIUS);

        let mut terrains = Terrain::standard_multiset();
        let mut numbers = standard_number_tokens();
        let mut balanced = false;

        for _ in 0..BALANCE_ATTEMPTS {
            terrains.shuffle(rng);
            numbers.shuffle(rng);
            if Self::numbers_are_separated(&coords, &terrains, &numbers) {
                balanced = true;
                break;
            }
        }

        let mut tiles = Vec::with_capacity(TILE_COUNT);
        let mut robber_hex = HexId::new(coords[0]);
        let mut next_number = numbers.iter().copied();
        for (coord, terrain) in coords.iter().zip(terrains.iter()) {
            let id = HexId::new(*coord);
            let number_token = match terrain {
                Terrain::Desert => {
                    robber_hex = id;
                    None
                }
                _ => next_number.next(),
            };
            tiles.push(HexTile {
                id,
                coord: *coord,
                terrain: *terrain,
                number_token,
            });
        }

        let ports = Self::place_ports(&coords, rng);

        Board {
            tiles,
            buildings: BTreeMap::new(),
            roads: BTreeMap::new(),
            ports,
            robber_hex,
            balanced,
        }
    }

    /// Would this terrain/number layout keep every 6 and 8 apart?
    fn numbers_are_separated(coords: &[AxialCoord], terrains: &[Terrain], numbers: &[u8]) -> bool {
        let mut by_coord: BTreeMap<AxialCoord, u8> = BTreeMap::new();
        let mut next = numbers.iter().copied();
        for (coord, terrain) in coords.iter().zip(terrains.iter()) {
            if !matches!(terrain, Terrain::Desert) {
                if let Some(n) = next.next() {
                    by_coord.insert(*coord, n);
                }
            }
        }
        for (coord, number) in &by_coord {
            if *number == 6 || *number == 8 {
                for neighbor in coord.neighbors() {
                    if let Some(n) = by_coord.get(&neighbor) {
                        if *n == 6 || *n == 8 {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Place the 9 ports: coastal edges ordered by angle, fixed anchor
    /// indices, port types shuffled over the anchors.
    fn place_ports<R: Rng>(coords: &[AxialCoord], rng: &mut R) -> Vec<Port> {
        let land: BTreeSet<AxialCoord> = coords.iter().copied().collect();
        let mut coastal: Vec<EdgeId> = BTreeSet::from_iter(
            coords
                .iter()
                .flat_map(|c| c.edges())
                .filter(|e| e.hexes().iter().filter(|h| land.contains(h)).count() == 1),
        )
        .into_iter()
        .collect();
        coastal.sort_by(|a, b| {
            a.angle_degrees()
                .partial_cmp(&b.angle_degrees())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut kinds = vec![
            PortKind::Generic,
            PortKind::Generic,
            PortKind::Generic,
            PortKind::Generic,
            PortKind::Resource(Resource::Brick),
            PortKind::Resource(Resource::Lumber),
            PortKind::Resource(Resource::Ore),
            PortKind::Resource(Resource::Grain),
            PortKind::Resource(Resource::Wool),
        ];
        kinds.shuffle(rng);

        PORT_ANCHORS
            .iter()
            .zip(kinds)
            .enumerate()
            .map(|(i, (&anchor, kind))| {
                let edge = coastal[anchor];
                Port {
                    id: format!("port_{i}"),
                    kind,
                    vertices: edge.endpoints(),
                    angle: edge.angle_degrees(),
                }
            })
            .collect()
    }

    // ---- queries ----

    pub fn tiles(&self) -> &[HexTile] {
        &self.tiles
    }

    pub fn tile(&self, id: &HexId) -> Option<&HexTile> {
        self.tiles.iter().find(|t| t.id == *id)
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn robber_hex(&self) -> HexId {
        self.robber_hex
    }

    pub fn balanced(&self) -> bool {
        self.balanced
    }

    pub fn buildings(&self) -> impl Iterator<Item = &Building> {
        self.buildings.values()
    }

    pub fn roads(&self) -> impl Iterator<Item = &Road> {
        self.roads.values()
    }

    pub fn building_at(&self, vertex: &VertexId) -> Option<&Building> {
        self.buildings.get(vertex)
    }

    pub fn road_at(&self, edge: &EdgeId) -> Option<&Road> {
        self.roads.get(edge)
    }

    fn is_land(&self, coord: &AxialCoord) -> bool {
        coord.distance_to(&AxialCoord::new(0, 0)) <= BOARD_RADIUS
    }

    /// A vertex is on the board when at least one touching hex is land.
    pub fn is_board_vertex(&self, vertex: &VertexId) -> bool {
        vertex.hexes().iter().any(|h| self.is_land(h))
    }

    /// An edge is on the board when at least one sharing hex is land.
    pub fn is_board_edge(&self, edge: &EdgeId) -> bool {
        edge.hexes().iter().any(|h| self.is_land(h))
    }

    /// No building on any vertex one edge away.
    pub fn satisfies_distance_rule(&self, vertex: &VertexId) -> bool {
        vertex
            .adjacent_vertices()
            .iter()
            .all(|adj| !self.buildings.contains_key(adj))
    }

    /// Does the player own a road on an edge incident to this vertex?
    pub fn has_incident_road(&self, vertex: &VertexId, player: PlayerId) -> bool {
        vertex
            .edges()
            .iter()
            .any(|e| self.roads.get(e).is_some_and(|r| r.owner == player))
    }

    /// Settlement placement legality. During setup the road-connection
    /// requirement is waived; the distance rule always applies.
    pub fn settlement_placement_legal(
        &self,
        vertex: &VertexId,
        player: PlayerId,
        is_setup: bool,
    ) -> bool {
        self.is_board_vertex(vertex)
            && !self.buildings.contains_key(vertex)
            && self.satisfies_distance_rule(vertex)
            && (is_setup || self.has_incident_road(vertex, player))
    }

    /// Road placement legality: the edge must be free and connect to the
    /// player's network through an endpoint that is either the player's own
    /// building or an open vertex reached by the player's road. An opponent
    /// building on an endpoint blocks continuation through that endpoint.
    pub fn road_placement_legal(&self, edge: &EdgeId, player: PlayerId) -> bool {
        if !self.is_board_edge(edge) || self.roads.contains_key(edge) {
            return false;
        }
        edge.endpoints().iter().any(|v| {
            match self.buildings.get(v) {
                Some(b) if b.owner == player => true,
                Some(_) => false,
                None => v
                    .edges()
                    .iter()
                    .any(|e| e != edge && self.roads.get(e).is_some_and(|r| r.owner == player)),
            }
        })
    }

    /// Is there any legal road placement for this player right now?
    pub fn has_legal_road_spot(&self, player: PlayerId) -> bool {
        // Candidates only exist next to the player's own network.
        let mut candidates: BTreeSet<EdgeId> = BTreeSet::new();
        for road in self.roads.values().filter(|r| r.owner == player) {
            for v in road.edge.endpoints() {
                candidates.extend(v.edges());
            }
        }
        for building in self.buildings.values().filter(|b| b.owner == player) {
            candidates.extend(building.vertex.edges());
        }
        candidates
            .iter()
            .any(|e| self.road_placement_legal(e, player))
    }

    /// Land tiles touching a vertex.
    pub fn tiles_at_vertex(&self, vertex: &VertexId) -> Vec<&HexTile> {
        vertex
            .hexes()
            .iter()
            .filter_map(|h| self.tile(&HexId::new(*h)))
            .collect()
    }

    /// Raw production entitlement for a roll, before bank scarcity: per
    /// player, per resource, from every matching tile not held by the
    /// robber.
    pub fn production_for_roll(&self, roll: u8) -> BTreeMap<PlayerId, Vec<(Resource, u32)>> {
        let mut out: BTreeMap<PlayerId, BTreeMap<Resource, u32>> = BTreeMap::new();
        for tile in &self.tiles {
            if tile.number_token != Some(roll) || tile.id == self.robber_hex {
                continue;
            }
            let resource = match tile.terrain.resource() {
                Some(r) => r,
                None => continue,
            };
            for vertex in tile.coord.vertices() {
                if let Some(building) = self.buildings.get(&vertex) {
                    *out.entry(building.owner)
                        .or_default()
                        .entry(resource)
                        .or_insert(0) += building.kind.production();
                }
            }
        }
        out.into_iter()
            .map(|(p, by_resource)| (p, by_resource.into_iter().collect()))
            .collect()
    }

    /// Owners of buildings on the corners of a hex.
    pub fn players_adjacent_to_hex(&self, hex: &HexId) -> BTreeSet<PlayerId> {
        let mut players = BTreeSet::new();
        if self.tile(hex).is_some() {
            for vertex in hex.coord().vertices() {
                if let Some(b) = self.buildings.get(&vertex) {
                    players.insert(b.owner);
                }
            }
        }
        players
    }

    /// Ports reachable through the player's buildings.
    pub fn port_kinds_for_player(&self, player: PlayerId) -> Vec<PortKind> {
        self.ports
            .iter()
            .filter(|port| {
                port.vertices
                    .iter()
                    .any(|v| self.buildings.get(v).is_some_and(|b| b.owner == player))
            })
            .map(|port| port.kind)
            .collect()
    }

    /// Best maritime rate for giving away a resource: 2 with the matching
    /// port, 3 with any generic port, 4 otherwise.
    pub fn trade_rate(&self, player: PlayerId, give: Resource) -> u32 {
        let kinds = self.port_kinds_for_player(player);
        if kinds.contains(&PortKind::Resource(give)) {
            2
        } else if kinds.contains(&PortKind::Generic) {
            3
        } else {
            4
        }
    }

    // ---- longest road ----

    /// Length of the player's longest simple (edge-disjoint) road trail.
    /// Opponent buildings cut the trail at their vertex.
    ///
    /// Every maximal trail starts at some road walked in one of its two
    /// directions, so the search enumerates `(road, exit vertex)` starting
    /// states and extends each walk only through the vertex it currently
    /// exits from. Tracking the exit keeps a corner from acting as a
    /// thoroughfare twice: three own roads forking from one corner count
    /// as a trail of two, not three. Used roads live in a bitmask; the
    /// per-player road pool is capped at 15, so a word is plenty.
    pub fn longest_road(&self, player: PlayerId) -> u32 {
        let own: Vec<EdgeId> = self
            .roads
            .values()
            .filter(|r| r.owner == player)
            .map(|r| r.edge)
            .collect();
        if own.is_empty() {
            return 0;
        }
        let slot: BTreeMap<EdgeId, usize> =
            own.iter().enumerate().map(|(i, e)| (*e, i)).collect();

        // (vertex the walk exits from, roads already used)
        let mut frontier: Vec<(VertexId, u32)> = own
            .iter()
            .enumerate()
            .flat_map(|(i, road)| road.endpoints().map(|v| (v, 1u32 << i)))
            .collect();

        let mut best = 1;
        while let Some((exit, used)) = frontier.pop() {
            best = best.max(used.count_ones());
            // A blocked corner can end a trail but never carries it on.
            if self
                .buildings
                .get(&exit)
                .is_some_and(|b| b.owner != player)
            {
                continue;
            }
            for next in exit.edges() {
                let Some(&i) = slot.get(&next) else { continue };
                if used & (1 << i) != 0 {
                    continue;
                }
                let [a, b] = next.endpoints();
                let far = if a == exit { b } else { a };
                frontier.push((far, used | (1 << i)));
            }
        }
        best
    }

    // ---- mutations ----

    /// Place a settlement. Legality is the caller's responsibility.
    pub fn place_settlement(&mut self, vertex: VertexId, owner: PlayerId) {
        self.buildings.insert(
            vertex,
            Building {
                vertex,
                owner,
                kind: BuildingKind::Settlement,
            },
        );
    }

    /// Replace a settlement with a city.
    pub fn upgrade_to_city(&mut self, vertex: VertexId, owner: PlayerId) {
        self.buildings.insert(
            vertex,
            Building {
                vertex,
                owner,
                kind: BuildingKind::City,
            },
        );
    }

    /// Place a road. Legality is the caller's responsibility.
    pub fn place_road(&mut self, edge: EdgeId, owner: PlayerId) {
        self.roads.insert(edge, Road { edge, owner });
    }

    pub fn move_robber(&mut self, hex: HexId) {
        self.robber_hex = hex;
    }
}
