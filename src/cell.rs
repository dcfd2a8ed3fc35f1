//! Spherical cell addressing for map queries.
//!
//! The server scopes map-object queries to 64-bit cell identifiers from a
//! hierarchical subdivision of the sphere: six cube faces, each split into
//! a quadtree whose leaves are ordered along a Hilbert curve. An id packs
//! 3 face bits, up to 60 position bits and a trailing sentinel bit marking
//! the level. The protocol fixes the query level at 15.
//!
//! The server treats a submitted cell list as a range descriptor, so the
//! list must be ascending and free of duplicates.

use crate::location::Location;

/// Quadtree depth of a leaf cell.
const MAX_LEVEL: u32 = 30;

/// Subdivision level used for all map queries.
pub const CELL_LEVEL: u32 = 15;

/// Default number of predecessor/successor steps taken around the origin
/// cell when building a query neighborhood.
pub const DEFAULT_NEIGHBORHOOD_RADIUS: usize = 10;

// Hilbert curve traversal tables. `orientation` is a 2-bit state: bit 0
// swaps the i/j axes, bit 1 inverts them.
const SWAP_MASK: u8 = 0x01;
const INVERT_MASK: u8 = 0x02;

const IJ_TO_POS: [[u64; 4]; 4] = [
    [0, 1, 3, 2],
    [0, 3, 1, 2],
    [2, 3, 1, 0],
    [2, 1, 3, 0],
];

const POS_TO_ORIENTATION: [u8; 4] = [SWAP_MASK, 0, 0, INVERT_MASK | SWAP_MASK];

/// A cell identifier at any level of the subdivision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub u64);

impl CellId {
    /// Leaf cell containing the given coordinates.
    pub fn from_location(location: &Location) -> Self {
        let phi = location.latitude.to_radians();
        let theta = location.longitude.to_radians();
        let cos_phi = phi.cos();
        let p = [
            theta.cos() * cos_phi,
            theta.sin() * cos_phi,
            phi.sin(),
        ];

        let face = face_of(&p);
        let (u, v) = face_uv(face, &p);
        let i = st_to_ij(uv_to_st(u));
        let j = st_to_ij(uv_to_st(v));
        Self::from_face_ij(face, i, j)
    }

    /// Builds a leaf id from face coordinates by walking the Hilbert curve
    /// one quadtree level at a time.
    fn from_face_ij(face: u8, i: u32, j: u32) -> Self {
        let mut pos: u64 = 0;
        let mut orientation = face & SWAP_MASK;

        for k in (0..MAX_LEVEL).rev() {
            let i_bit = ((i >> k) & 1) as u64;
            let j_bit = ((j >> k) & 1) as u64;
            let quad = IJ_TO_POS[orientation as usize][((i_bit << 1) | j_bit) as usize];
            pos = (pos << 2) | quad;
            orientation ^= POS_TO_ORIENTATION[quad as usize];
        }

        CellId(((face as u64) << 61) | (pos << 1) | 1)
    }

    /// Lowest set bit; its position encodes the level.
    fn lsb(self) -> u64 {
        self.0 & self.0.wrapping_neg()
    }

    pub fn level(self) -> u32 {
        MAX_LEVEL - (self.0.trailing_zeros() / 2)
    }

    pub fn face(self) -> u8 {
        (self.0 >> 61) as u8
    }

    /// Ancestor cell at the given (coarser) level.
    pub fn parent(self, level: u32) -> Self {
        let new_lsb = 1u64 << (2 * (MAX_LEVEL - level));
        CellId((self.0 & new_lsb.wrapping_neg()) | new_lsb)
    }

    /// Next cell at this level in Hilbert-curve order.
    pub fn next(self) -> Self {
        CellId(self.0.wrapping_add(self.lsb() << 1))
    }

    /// Previous cell at this level in Hilbert-curve order.
    pub fn prev(self) -> Self {
        CellId(self.0.wrapping_sub(self.lsb() << 1))
    }
}

/// Cube face (0..5) whose axis dominates the point.
fn face_of(p: &[f64; 3]) -> u8 {
    let mut axis = 0;
    if p[1].abs() > p[0].abs() {
        axis = 1;
    }
    if p[2].abs() > p[axis].abs() {
        axis = 2;
    }
    if p[axis] < 0.0 {
        (axis + 3) as u8
    } else {
        axis as u8
    }
}

fn face_uv(face: u8, p: &[f64; 3]) -> (f64, f64) {
    match face {
        0 => (p[1] / p[0], p[2] / p[0]),
        1 => (-p[0] / p[1], p[2] / p[1]),
        2 => (-p[0] / p[2], -p[1] / p[2]),
        3 => (p[2] / p[0], p[1] / p[0]),
        4 => (p[2] / p[1], -p[0] / p[1]),
        _ => (-p[1] / p[2], -p[0] / p[2]),
    }
}

/// Quadratic projection from cube-face coordinates to cell space. Keeps
/// cell areas roughly uniform across a face.
fn uv_to_st(u: f64) -> f64 {
    if u >= 0.0 {
        0.5 * (1.0 + 3.0 * u).sqrt()
    } else {
        1.0 - 0.5 * (1.0 - 3.0 * u).sqrt()
    }
}

fn st_to_ij(s: f64) -> u32 {
    let scaled = (s * (1u64 << MAX_LEVEL) as f64).floor() as i64;
    scaled.clamp(0, (1i64 << MAX_LEVEL) - 1) as u32
}

/// Ascending, deduplicated level-15 cell ids covering the location: the
/// origin cell plus `radius` predecessor and successor cells on each side
/// in Hilbert-curve order.
pub fn neighborhood(location: &Location, radius: usize) -> Vec<u64> {
    let origin = CellId::from_location(location).parent(CELL_LEVEL);

    let mut ids = Vec::with_capacity(2 * radius + 1);
    ids.push(origin.0);

    let mut prev = origin.prev();
    let mut next = origin.next();
    for _ in 0..radius {
        ids.push(prev.0);
        ids.push(next.0);
        prev = prev.prev();
        next = next.next();
    }

    ids.sort_unstable();
    ids.dedup();
    ids
}
