//! Tile coordinates and their URL path encoding.
//!
//! A tile is a contiguous run of up to `2^H` hashes at one level of the
//! tree, the unit clients download. Paths look like `tile/8/0/x001/234` with
//! the tile sequence split into `x`-prefixed base-1000 groups, and partial
//! right-edge tiles carry a `.p/<W>` suffix. Data tiles use `data` in place
//! of the level and hold record bytes rather than hashes.

use crate::error::{Result, SumdbError};
use crate::tlog::index::stored_hash_index;

const PATH_BASE: u64 = 1000;
const MAX_HEIGHT: u8 = 30;
const MAX_LEVEL: i8 = 63;

/// Coordinates of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    /// Tile height `H`; each complete tile holds `2^H` hashes.
    pub height: u8,
    /// Tile level `L`; `-1` denotes a data tile (`data` on the wire).
    pub level: i8,
    /// Tile sequence `N` within the level.
    pub seq: u64,
    /// Width `W` in `1..=2^H`; less than `2^H` only at the right edge.
    pub width: u32,
}

impl Tile {
    /// True for data tiles, whose contents are record bytes.
    pub fn is_data(&self) -> bool {
        self.level < 0
    }

    /// Number of hashes in a complete tile of this height.
    pub fn full_width(&self) -> u32 {
        1 << self.height
    }

    /// Index of the first record covered by this (level-0 or data) tile.
    pub fn start_record(&self) -> u64 {
        self.seq << self.height
    }

    /// The stored-hash indexes covered by a hash tile, in order.
    pub fn hash_indexes(&self) -> Result<Vec<u64>> {
        if self.is_data() {
            return Err(SumdbError::Internal {
                message: "data tiles do not cover hash indexes".into(),
            });
        }
        let level = self.height as usize * self.level as usize;
        let start = self.seq << self.height;
        Ok((0..u64::from(self.width)).map(|i| stored_hash_index(level, start + i)).collect())
    }

    /// Render the `tile/H/L/NNN[.p/W]` coordinate path.
    pub fn path(&self) -> String {
        let mut n = format!("{:03}", self.seq % PATH_BASE);
        let mut rest = self.seq / PATH_BASE;
        while rest > 0 {
            n = format!("x{:03}/{n}", rest % PATH_BASE);
            rest /= PATH_BASE;
        }
        let level = if self.is_data() { "data".to_string() } else { self.level.to_string() };
        let partial = if self.width == self.full_width() {
            String::new()
        } else {
            format!(".p/{}", self.width)
        };
        format!("tile/{}/{level}/{n}{partial}", self.height)
    }

    /// Parse a `tile/H/L/NNN[.p/W]` coordinate path.
    pub fn from_path(path: &str) -> Result<Tile> {
        let invalid = || SumdbError::InvalidTile {
            reason: format!("malformed tile path {path:?}"),
        };
        let mut parts: Vec<&str> = path.split('/').collect();
        if parts.len() < 4 || parts[0] != "tile" {
            return Err(invalid());
        }

        let height: u8 = parts[1].parse().map_err(|_| invalid())?;
        if height == 0 || height > MAX_HEIGHT {
            return Err(invalid());
        }

        let level = if parts[2] == "data" {
            -1i8
        } else {
            let l: i8 = parts[2].parse().map_err(|_| invalid())?;
            if !(0..=MAX_LEVEL).contains(&l) {
                return Err(invalid());
            }
            l
        };

        // Optional partial-width suffix: …/NNN.p/W as the last two segments.
        let mut width = 1u32 << height;
        let last = parts.len() - 1;
        if last >= 4 && parts[last - 1].ends_with(".p") {
            width = parts[last].parse().map_err(|_| invalid())?;
            if width == 0 || width > (1 << height) {
                return Err(invalid());
            }
            let trimmed = parts[last - 1].strip_suffix(".p").ok_or_else(invalid)?;
            parts[last - 1] = trimmed;
            parts.pop();
        }

        let mut seq = 0u64;
        for (i, part) in parts[3..].iter().enumerate() {
            let digits = if i + 4 < parts.len() {
                part.strip_prefix('x').ok_or_else(invalid)?
            } else {
                part
            };
            if digits.len() != 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            let group: u64 = digits.parse().map_err(|_| invalid())?;
            seq = seq
                .checked_mul(PATH_BASE)
                .and_then(|s| s.checked_add(group))
                .ok_or_else(invalid)?;
        }

        let tile = Tile {
            height,
            level,
            seq,
            width,
        };
        // The rendering is canonical; reject any path that does not survive
        // a round trip (e.g. x000 prefixes).
        if tile.path() != path {
            return Err(invalid());
        }
        Ok(tile)
    }
}

impl std::fmt::Display for Tile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}
