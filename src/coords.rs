//! 方块 / 区块 / 区域坐标换算
//!
//! 所有换算都是精确的位运算：方块→区块右移 4 位，区块→区域再右移 5 位，
//! 反方向为左移。

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// 每个区域边长的区块数
pub const REGION_CHUNKS: i32 = 32;

/// 每个区域的槽位数
pub const SLOT_COUNT: usize = 1024;

static REGION_FILE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^r\.(-?\d+)\.(-?\d+)\.mca$").expect("区域文件名正则"));

#[inline]
pub fn block_to_chunk(b: i32) -> i32 {
    b >> 4
}

#[inline]
pub fn chunk_to_block(c: i32) -> i32 {
    c << 4
}

#[inline]
pub fn chunk_to_region(c: i32) -> i32 {
    c >> 5
}

#[inline]
pub fn region_to_chunk(r: i32) -> i32 {
    r << 5
}

/// 区域坐标，对应文件 `r.{x}.{z}.mca`
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegionPos {
    pub x: i32,
    pub z: i32,
}

/// 绝对区块坐标
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChunkPos {
    pub x: i32,
    pub z: i32,
}

/// 区域内的本地区块坐标，取值 [0, 32)
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct LocalPos {
    pub x: u8,
    pub z: u8,
}

impl RegionPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// 解析区域文件名，例如 `r.0.-1.mca`
    pub fn from_file_name(name: &str) -> Option<Self> {
        let caps = REGION_FILE_RE.captures(name)?;
        let x = caps.get(1)?.as_str().parse().ok()?;
        let z = caps.get(2)?.as_str().parse().ok()?;
        Some(Self { x, z })
    }

    pub fn file_name(&self) -> String {
        format!("r.{}.{}.mca", self.x, self.z)
    }

    /// 区域内本地坐标对应的绝对区块坐标
    pub fn chunk(&self, local: LocalPos) -> ChunkPos {
        ChunkPos {
            x: region_to_chunk(self.x) | local.x as i32,
            z: region_to_chunk(self.z) | local.z as i32,
        }
    }

    /// 区域左上角的区块
    pub fn min_chunk(&self) -> ChunkPos {
        ChunkPos::new(region_to_chunk(self.x), region_to_chunk(self.z))
    }
}

impl ChunkPos {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn from_block(bx: i32, bz: i32) -> Self {
        Self::new(block_to_chunk(bx), block_to_chunk(bz))
    }

    pub fn region(&self) -> RegionPos {
        RegionPos::new(chunk_to_region(self.x), chunk_to_region(self.z))
    }

    pub fn local(&self) -> LocalPos {
        LocalPos {
            x: (self.x & 31) as u8,
            z: (self.z & 31) as u8,
        }
    }

    /// 区块西北角方块坐标
    pub fn block(&self) -> (i32, i32) {
        (chunk_to_block(self.x), chunk_to_block(self.z))
    }

    /// 平移后的区块，超出坐标范围时返回 `None`
    pub fn offset(&self, dx: i32, dz: i32) -> Option<Self> {
        Some(Self::new(self.x.checked_add(dx)?, self.z.checked_add(dz)?))
    }
}

impl LocalPos {
    pub fn new(x: u8, z: u8) -> Self {
        debug_assert!(x < 32 && z < 32);
        Self { x: x & 31, z: z & 31 }
    }

    /// 槽位索引 `z * 32 + x`
    #[inline]
    pub fn index(&self) -> usize {
        self.z as usize * REGION_CHUNKS as usize + self.x as usize
    }

    #[inline]
    pub fn from_index(index: usize) -> Self {
        Self {
            x: (index % 32) as u8,
            z: ((index / 32) % 32) as u8,
        }
    }
}

// 按槽位索引排序，使选区导出顺序与文件布局一致
impl Ord for LocalPos {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index().cmp(&other.index())
    }
}

impl PartialOrd for LocalPos {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ChunkPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

impl fmt::Display for RegionPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r.{}.{}", self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_chunk_round_trip() {
        for c in (-70_000..70_000).step_by(7) {
            assert_eq!(block_to_chunk(chunk_to_block(c)), c);
        }
        for c in [i32::MIN >> 4, (i32::MAX >> 4) - 1, 0, -1] {
            assert_eq!(block_to_chunk(chunk_to_block(c)), c);
        }
    }

    #[test]
    fn chunk_region_round_trip() {
        for r in -5000..5000 {
            assert_eq!(chunk_to_region(region_to_chunk(r)), r);
        }
    }

    #[test]
    fn negative_coordinates_floor() {
        assert_eq!(block_to_chunk(-1), -1);
        assert_eq!(block_to_chunk(-16), -1);
        assert_eq!(block_to_chunk(-17), -2);
        assert_eq!(chunk_to_region(-1), -1);
        assert_eq!(chunk_to_region(-32), -1);
        assert_eq!(chunk_to_region(-33), -2);

        let c = ChunkPos::new(-1, -33);
        assert_eq!(c.region(), RegionPos::new(-1, -2));
        assert_eq!(c.local(), LocalPos::new(31, 31));
        assert_eq!(c.region().chunk(c.local()), c);
    }

    #[test]
    fn slot_index_layout() {
        let l = LocalPos::new(3, 4);
        assert_eq!(l.index(), 4 * 32 + 3);
        assert_eq!(LocalPos::from_index(l.index()), l);
        assert_eq!(LocalPos::from_index(1023), LocalPos::new(31, 31));
    }

    #[test]
    fn region_file_names() {
        assert_eq!(RegionPos::from_file_name("r.0.-1.mca"), Some(RegionPos::new(0, -1)));
        assert_eq!(RegionPos::from_file_name("r.12.7.mca"), Some(RegionPos::new(12, 7)));
        assert_eq!(RegionPos::from_file_name("r.0.0.mcr"), None);
        assert_eq!(RegionPos::from_file_name("r.a.0.mca"), None);
        assert_eq!(RegionPos::from_file_name("xr.0.0.mca.tmp"), None);
        assert_eq!(RegionPos::new(-3, 2).file_name(), "r.-3.2.mca");
    }
}
