//! 选区：按区域分组的稀疏区块集合，以及 CSV 读写
//!
//! CSV 每行一个绝对区块坐标 `x,z`。

use crate::coords::{ChunkPos, LocalPos, RegionPos, SLOT_COUNT};
use crate::error::Result;
use crate::mca::commit_atomic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// 区域键存在但区块集合为空时的含义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRegionPolicy {
    /// 不选中该区域的任何区块
    #[default]
    Nothing,
    /// 选中整个区域
    WholeRegion,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    regions: BTreeMap<RegionPos, BTreeSet<LocalPos>>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk: ChunkPos) {
        self.insert_local(chunk.region(), chunk.local());
    }

    pub fn insert_local(&mut self, region: RegionPos, local: LocalPos) {
        self.regions.entry(region).or_default().insert(local);
    }

    /// 插入一个显式的空区域键，含义由 [`EmptyRegionPolicy`] 决定
    pub fn insert_region(&mut self, region: RegionPos) {
        self.regions.entry(region).or_default();
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> impl Iterator<Item = RegionPos> + '_ {
        self.regions.keys().copied()
    }

    pub fn contains_region(&self, region: RegionPos) -> bool {
        self.regions.contains_key(&region)
    }

    /// 选中的区块总数（显式空区域不计）
    pub fn chunk_count(&self) -> usize {
        self.regions.values().map(BTreeSet::len).sum()
    }

    pub fn contains(&self, chunk: ChunkPos, policy: EmptyRegionPolicy) -> bool {
        match self.regions.get(&chunk.region()) {
            None => false,
            Some(set) if set.is_empty() => policy == EmptyRegionPolicy::WholeRegion,
            Some(set) => set.contains(&chunk.local()),
        }
    }

    /// 区域内选中的槽位索引；区域未选中返回 `None`
    pub fn slots_in(&self, region: RegionPos, policy: EmptyRegionPolicy) -> Option<Vec<usize>> {
        let set = self.regions.get(&region)?;
        if set.is_empty() {
            return match policy {
                EmptyRegionPolicy::Nothing => Some(Vec::new()),
                EmptyRegionPolicy::WholeRegion => Some((0..SLOT_COUNT).collect()),
            };
        }
        Some(set.iter().map(LocalPos::index).collect())
    }

    /// 按顺序遍历所有选中的绝对区块坐标
    pub fn chunks(&self) -> impl Iterator<Item = ChunkPos> + '_ {
        self.regions
            .iter()
            .flat_map(|(region, set)| set.iter().map(move |local| region.chunk(*local)))
    }

    /// 合并另一个选区（并集）
    pub fn merge(&mut self, other: SelectionSet) {
        for (region, set) in other.regions {
            self.regions.entry(region).or_default().extend(set);
        }
    }

    /// 把每个选中区块周围切比雪夫距离 `radius` 内的区块加入选区
    pub fn expand(&self, radius: u32) -> SelectionSet {
        if radius == 0 {
            return self.clone();
        }
        let r = radius as i32;
        let mut out = self.clone();
        for chunk in self.chunks() {
            for dz in -r..=r {
                for dx in -r..=r {
                    if let Some(near) = chunk.offset(dx, dz) {
                        out.insert(near);
                    }
                }
            }
        }
        out
    }

    /// 从 CSV 读取；格式错误的行被跳过
    pub fn import_csv<R: BufRead>(reader: R) -> Result<Self> {
        let mut set = SelectionSet::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_line(trimmed) {
                Some(chunk) => set.insert(chunk),
                None => log::debug!("跳过无效选区行 {}: {:?}", line_no + 1, trimmed),
            }
        }
        Ok(set)
    }

    pub fn load_csv(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        Self::import_csv(BufReader::new(file))
    }

    /// 每个选中区块写一行 `x,z`
    pub fn export_csv<W: Write>(&self, mut writer: W) -> Result<()> {
        for chunk in self.chunks() {
            writeln!(writer, "{},{}", chunk.x, chunk.z)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// 原子写入 CSV 文件
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut buf = Vec::new();
        self.export_csv(&mut buf)?;
        commit_atomic(path, &buf, |_| Ok(()))?;
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<ChunkPos> {
    let (x, z) = line.split_once(',')?;
    let x = x.trim().parse().ok()?;
    let z = z.trim().parse().ok()?;
    Some(ChunkPos::new(x, z))
}

impl FromIterator<ChunkPos> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = ChunkPos>>(iter: I) -> Self {
        let mut set = SelectionSet::new();
        for chunk in iter {
            set.insert(chunk);
        }
        set
    }
}
