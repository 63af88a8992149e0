//! Axial hex coordinates and the derived string identities for tiles,
//! vertices, and edges.
//!
//! Everything above this module addresses the board through stable string
//! IDs: `hex_<q>_<r>` for tiles, `v_` plus the three adjacent hex IDs for a
//! corner, `e_` plus the two adjacent hex IDs for a side. The IDs are
//! derived purely from geometry, so a vertex or edge means the same thing
//! no matter which hex it was reached from. Coordinates never cross the
//! wire.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from coordinate math and ID parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("invalid direction index {0} (expected 0..6)")]
    InvalidDirection(usize),

    #[error("invalid id: {0}")]
    InvalidId(String),
}

/// Axial coordinate on the hex grid.
///
/// `q` grows east, `r` grows southeast; the implicit cube coordinate
/// satisfies `q + r + s = 0`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct AxialCoord {
    pub q: i32,
    pub r: i32,
}

/// Offsets for the six neighbors, in the fixed protocol order
/// E, NE, NW, W, SW, SE. The order walks counterclockwise, so consecutive
/// entries are adjacent to each other — corner enumeration relies on that.
pub const DIRECTIONS: [(i32, i32); 6] = [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

impl AxialCoord {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    /// The implicit third cube coordinate.
    pub const fn s(&self) -> i32 {
        -self.q - self.r
    }

    /// The six neighboring hexes in the fixed direction order.
    pub fn neighbors(&self) -> [AxialCoord; 6] {
        DIRECTIONS.map(|(dq, dr)| AxialCoord::new(self.q + dq, self.r + dr))
    }

    /// Neighbor in a given direction index (0 = E .. 5 = SE).
    pub fn neighbor(&self, direction: usize) -> Result<AxialCoord, HexError> {
        let (dq, dr) = *DIRECTIONS
            .get(direction)
            .ok_or(HexError::InvalidDirection(direction))?;
        Ok(AxialCoord::new(self.q + dq, self.r + dr))
    }

    /// Cube-metric distance in hex steps.
    pub fn distance_to(&self, other: &AxialCoord) -> u32 {
        let dq = (self.q - other.q).abs();
        let dr = (self.r - other.r).abs();
        let ds = (self.s() - other.s()).abs();
        ((dq + dr + ds) / 2) as u32
    }

    /// The ring of hexes at exactly `radius` steps from `center`.
    ///
    /// Canonical ordering: start at the eastern cell (`center + E*radius`)
    /// and walk the perimeter counterclockwise.
    pub fn ring(center: AxialCoord, radius: u32) -> Vec<AxialCoord> {
        if radius == 0 {
            return vec![center];
        }
        let r = radius as i32;
        let mut cell = AxialCoord::new(center.q + r, center.r);
        let mut out = Vec::with_capacity(6 * radius as usize);
        // Walk order NW, W, SW, SE, E, NE traces the ring from the east cell.
        for dir in [2usize, 3, 4, 5, 0, 1] {
            for _ in 0..radius {
                out.push(cell);
                let (dq, dr) = DIRECTIONS[dir];
                cell = AxialCoord::new(cell.q + dq, cell.r + dr);
            }
        }
        out
    }

    /// Center followed by rings 1..=radius, each in ring order.
    pub fn spiral(center: AxialCoord, radius: u32) -> Vec<AxialCoord> {
        let mut out = vec![center];
        for r in 1..=radius {
            out.extend(Self::ring(center, r));
        }
        out
    }

    /// Round fractional axial coordinates to the containing hex, via the
    /// cube coordinates.
    pub fn round(q: f64, r: f64) -> AxialCoord {
        let s = -q - r;
        let mut rq = q.round();
        let mut rr = r.round();
        let rs = s.round();

        let dq = (rq - q).abs();
        let dr = (rr - r).abs();
        let ds = (rs - s).abs();
        if dq > dr && dq > ds {
            rq = -rr - rs;
        } else if dr > ds {
            rr = -rq - rs;
        }
        AxialCoord::new(rq as i32, rr as i32)
    }

    /// The six corners of this hex, counterclockwise from the ENE corner.
    ///
    /// Each corner is the meeting point of this hex and two consecutive
    /// neighbors.
    pub fn vertices(&self) -> [VertexId; 6] {
        let n = self.neighbors();
        [0, 1, 2, 3, 4, 5].map(|i| VertexId::new([*self, n[i], n[(i + 1) % 6]]))
    }

    /// The six sides of this hex in the fixed direction order.
    pub fn edges(&self) -> [EdgeId; 6] {
        self.neighbors().map(|n| EdgeId::new([*self, n]))
    }

    /// Pixel position of the hex center (pointy-top, unit size). Only used
    /// to order coastal edges by angle for port placement.
    pub fn to_pixel(&self) -> (f64, f64) {
        let x = 3.0_f64.sqrt() * (self.q as f64 + self.r as f64 / 2.0);
        let y = 1.5 * self.r as f64;
        (x, y)
    }

    /// The two hexes adjacent to both `a` and `b`, for adjacent `a`, `b`.
    fn common_neighbors(a: AxialCoord, b: AxialCoord) -> Vec<AxialCoord> {
        let bn = b.neighbors();
        a.neighbors()
            .into_iter()
            .filter(|c| bn.contains(c))
            .collect()
    }

    fn parse_body(body: &str, full: &str) -> Result<AxialCoord, HexError> {
        let mut parts = body.split('_');
        let q = parts
            .next()
            .and_then(|p| p.parse::<i32>().ok())
            .ok_or_else(|| HexError::InvalidId(full.to_string()))?;
        let r = parts
            .next()
            .and_then(|p| p.parse::<i32>().ok())
            .ok_or_else(|| HexError::InvalidId(full.to_string()))?;
        if parts.next().is_some() {
            return Err(HexError::InvalidId(full.to_string()));
        }
        Ok(AxialCoord::new(q, r))
    }

    /// Split an ID tail of the form `hex_a_b_hex_c_d_…` into coordinates.
    fn parse_hex_list(tail: &str, full: &str) -> Result<Vec<AxialCoord>, HexError> {
        if !tail.starts_with("hex_") {
            return Err(HexError::InvalidId(full.to_string()));
        }
        tail.split("hex_")
            .filter(|chunk| !chunk.is_empty())
            .map(|chunk| Self::parse_body(chunk.trim_end_matches('_'), full))
            .collect()
    }
}

/// Identity of a single hex tile: the string `hex_<q>_<r>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexId {
    coord: AxialCoord,
}

impl HexId {
    pub fn new(coord: AxialCoord) -> Self {
        Self { coord }
    }

    pub fn coord(&self) -> AxialCoord {
        self.coord
    }
}

impl fmt::Display for HexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hex_{}_{}", self.coord.q, self.coord.r)
    }
}

impl FromStr for HexId {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, HexError> {
        let body = s
            .strip_prefix("hex_")
            .ok_or_else(|| HexError::InvalidId(s.to_string()))?;
        Ok(Self::new(AxialCoord::parse_body(body, s)?))
    }
}

/// Identity of a corner: the three hexes that meet there, sorted by
/// `(q, r)`. Printed as `v_<hex id>_<hex id>_<hex id>`.
///
/// A corner of the grid always touches exactly three hex coordinates;
/// whether those hexes are on the board is the board's concern, not the
/// identity's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId {
    hexes: [AxialCoord; 3],
}

impl VertexId {
    /// Canonicalize from the three touching hexes, in any order.
    pub fn new(mut hexes: [AxialCoord; 3]) -> Self {
        hexes.sort();
        Self { hexes }
    }

    /// The three hexes touching this corner.
    pub fn hexes(&self) -> [AxialCoord; 3] {
        self.hexes
    }

    /// The three edges meeting at this corner: one per pair of touching
    /// hexes.
    pub fn edges(&self) -> [EdgeId; 3] {
        let [a, b, c] = self.hexes;
        [
            EdgeId::new([a, b]),
            EdgeId::new([a, c]),
            EdgeId::new([b, c]),
        ]
    }

    /// The three corners one edge away from this one.
    pub fn adjacent_vertices(&self) -> [VertexId; 3] {
        self.edges().map(|e| {
            let [v1, v2] = e.endpoints();
            if v1 == *self {
                v2
            } else {
                v1
            }
        })
    }

    /// Pixel position of the corner (mean of the three hex centers).
    pub fn to_pixel(&self) -> (f64, f64) {
        let mut x = 0.0;
        let mut y = 0.0;
        for h in self.hexes {
            let (hx, hy) = h.to_pixel();
            x += hx;
            y += hy;
        }
        (x / 3.0, y / 3.0)
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "v_{}_{}_{}",
            HexId::new(self.hexes[0]),
            HexId::new(self.hexes[1]),
            HexId::new(self.hexes[2])
        )
    }
}

impl FromStr for VertexId {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, HexError> {
        let tail = s
            .strip_prefix("v_")
            .ok_or_else(|| HexError::InvalidId(s.to_string()))?;
        let coords = AxialCoord::parse_hex_list(tail, s)?;
        let [a, b, c]: [AxialCoord; 3] = coords
            .try_into()
            .map_err(|_| HexError::InvalidId(s.to_string()))?;
        // The three hexes must be mutually adjacent to name a real corner,
        // and the printed form must already be canonical.
        if a.distance_to(&b) != 1 || a.distance_to(&c) != 1 || b.distance_to(&c) != 1 {
            return Err(HexError::InvalidId(s.to_string()));
        }
        let id = Self::new([a, b, c]);
        if id.to_string() != s {
            return Err(HexError::InvalidId(s.to_string()));
        }
        Ok(id)
    }
}

/// Identity of a side: the two hexes sharing it, sorted by `(q, r)`.
/// Printed as `e_<hex id>_<hex id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId {
    hexes: [AxialCoord; 2],
}

impl EdgeId {
    /// Canonicalize from the two sharing hexes, in any order.
    pub fn new(mut hexes: [AxialCoord; 2]) -> Self {
        hexes.sort();
        Self { hexes }
    }

    /// The two hexes sharing this side.
    pub fn hexes(&self) -> [AxialCoord; 2] {
        self.hexes
    }

    /// The two corners at the ends of this side. Each is formed by the two
    /// sharing hexes plus one of their common neighbors.
    pub fn endpoints(&self) -> [VertexId; 2] {
        let [a, b] = self.hexes;
        let common = AxialCoord::common_neighbors(a, b);
        // Adjacent hexes always share exactly two neighbors.
        debug_assert_eq!(common.len(), 2);
        [
            VertexId::new([a, b, common[0]]),
            VertexId::new([a, b, common[1]]),
        ]
    }

    /// Up to four edges sharing an endpoint with this one.
    pub fn adjacent_edges(&self) -> Vec<EdgeId> {
        let mut out = Vec::with_capacity(4);
        for v in self.endpoints() {
            for e in v.edges() {
                if e != *self && !out.contains(&e) {
                    out.push(e);
                }
            }
        }
        out
    }

    /// Pixel midpoint of the side (halfway between the hex centers).
    pub fn to_pixel(&self) -> (f64, f64) {
        let (x1, y1) = self.hexes[0].to_pixel();
        let (x2, y2) = self.hexes[1].to_pixel();
        ((x1 + x2) / 2.0, (y1 + y2) / 2.0)
    }

    /// Angle of the midpoint around the origin, degrees in `[0, 360)`.
    pub fn angle_degrees(&self) -> f64 {
        let (x, y) = self.to_pixel();
        y.atan2(x).to_degrees().rem_euclid(360.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "e_{}_{}",
            HexId::new(self.hexes[0]),
            HexId::new(self.hexes[1])
        )
    }
}

impl FromStr for EdgeId {
    type Err = HexError;

    fn from_str(s: &str) -> Result<Self, HexError> {
        let tail = s
            .strip_prefix("e_")
            .ok_or_else(|| HexError::InvalidId(s.to_string()))?;
        let coords = AxialCoord::parse_hex_list(tail, s)?;
        let [a, b]: [AxialCoord; 2] = coords
            .try_into()
            .map_err(|_| HexError::InvalidId(s.to_string()))?;
        if a.distance_to(&b) != 1 {
            return Err(HexError::InvalidId(s.to_string()));
        }
        let id = Self::new([a, b]);
        if id.to_string() != s {
            return Err(HexError::InvalidId(s.to_string()));
        }
        Ok(id)
    }
}

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

string_serde!(HexId);
string_serde!(VertexId);
string_serde!(EdgeId);
