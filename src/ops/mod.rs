//! 批处理操作
//!
//! 每个操作都实现 [`Operation`](crate::pipeline::Operation)，由显式的参数结构构造。

pub mod cache;
pub mod change;
pub mod delete;
pub mod delete_block;
pub mod export;
pub mod import;
pub mod select;

pub use cache::{CacheOperation, CacheParams, Heightmap, TileChunk, TileRenderer, TileRequest};
pub use change::{ChangeDirective, ChangeOperation, ChangeParams};
pub use delete::{DeleteOperation, DeleteParams};
pub use delete_block::{DeleteBlockOperation, DeleteBlockParams, IdSet};
pub use export::{ExportOperation, ExportParams};
pub use import::{ImportOperation, ImportParams, SectionRange};
pub use select::{SelectOperation, SelectParams};

use crate::codec;
use crate::coords::{ChunkPos, LocalPos, RegionPos};
use crate::error::{Error, Result};
use crate::filter::ChunkFilter;
use crate::mca::RegionFile;
use crate::pipeline::{discover_regions, WorkUnit};
use crate::selection::{EmptyRegionPolicy, SelectionSet};
use fastnbt::Value;
use std::path::Path;

/// 区块匹配规则：过滤条件与选区
///
/// - 有过滤条件：条件成立，且给了选区时还要在选区内
/// - 只有选区：按选区成员关系
/// - 都没有：由操作自己决定
#[derive(Debug, Clone, Default)]
pub struct ChunkMatcher {
    pub filter: Option<ChunkFilter>,
    pub selection: Option<SelectionSet>,
    pub policy: EmptyRegionPolicy,
}

impl ChunkMatcher {
    pub fn new(filter: Option<ChunkFilter>, selection: Option<SelectionSet>, policy: EmptyRegionPolicy) -> Self {
        Self {
            filter,
            selection,
            policy,
        }
    }

    /// 匹配所有区块
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.filter.is_none() && self.selection.is_none()
    }

    /// 不在选区中的区域不需要读取
    pub fn wants_region(&self, region: RegionPos) -> bool {
        self.selection
            .as_ref()
            .map_or(true, |s| s.contains_region(region))
    }

    /// 区域内通过选区检查的已存在槽位
    pub fn candidates(&self, region: RegionPos, file: &RegionFile) -> Vec<usize> {
        file.present_indices()
            .into_iter()
            .filter(|&i| self.in_selection(region.chunk(LocalPos::from_index(i))))
            .collect()
    }

    pub fn in_selection(&self, chunk: ChunkPos) -> bool {
        self.selection
            .as_ref()
            .map_or(true, |s| s.contains(chunk, self.policy))
    }

    /// 过滤条件检查；没有过滤条件时总是成立
    pub fn accepts(&self, chunk: ChunkPos, tree: &Value) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(chunk, tree))
    }

    /// 完整判断一个槽位，只在有过滤条件时解码
    pub fn matches_slot(&self, region: RegionPos, file: &RegionFile, index: usize) -> Result<bool> {
        let chunk = region.chunk(LocalPos::from_index(index));
        if !self.in_selection(chunk) {
            return Ok(false);
        }
        match &self.filter {
            None => Ok(file.is_present(index)),
            Some(filter) => match decode_slot(file, index)? {
                Some(tree) => Ok(filter.matches(chunk, &tree)),
                None => Ok(false),
            },
        }
    }
}

/// 读取后的单个区域文件
pub struct RegionJob {
    pub unit: WorkUnit,
    pub region: RegionFile,
}

impl RegionJob {
    pub fn load(unit: &WorkUnit) -> Result<Self> {
        Ok(Self {
            unit: unit.clone(),
            region: RegionFile::open(&unit.path)?,
        })
    }
}

/// 解码一个槽位，空槽位返回 `None`
pub fn decode_slot(file: &RegionFile, index: usize) -> Result<Option<Value>> {
    match file.read_chunk_payload(index)? {
        Some(payload) => Ok(Some(codec::decode(payload)?)),
        None => Ok(None),
    }
}

/// 按原压缩方式重新编码并写回槽位
pub fn store_slot(file: &mut RegionFile, index: usize, tree: &Value) -> Result<()> {
    let scheme = match file.read_chunk_payload(index)? {
        Some(payload) => codec::Compression::of(payload)?,
        None => codec::Compression::default(),
    };
    let payload = codec::encode(tree, scheme)?;
    file.set_payload(index, payload);
    Ok(())
}

pub(crate) fn require_dir(dir: &Path, what: &str) -> Result<()> {
    if !dir.is_dir() {
        return Err(Error::Validation(format!("{}不存在或不是目录: {}", what, dir.display())));
    }
    Ok(())
}

/// 列出区域文件，跳过不在选区中的区域
pub(crate) fn discover_matching(dir: &Path, matcher: &ChunkMatcher) -> Result<Vec<WorkUnit>> {
    let units = discover_regions(dir)?;
    let total = units.len();
    let units: Vec<_> = units
        .into_iter()
        .filter(|u| matcher.wants_region(u.region))
        .collect();
    if units.len() < total {
        log::debug!("选区外的 {} 个区域文件不读取", total - units.len());
    }
    Ok(units)
}

#[cfg(test)]
pub(crate) mod testutil {
    //! 测试用区块与区域文件构造

    use crate::codec::{self, Compression};
    use crate::coords::{ChunkPos, RegionPos};
    use crate::mca::{write_region, EmptyFilePolicy, SlotImage};
    use fastnbt::Value;
    use std::collections::HashMap;
    use std::path::Path;

    pub fn compound(entries: Vec<(&str, Value)>) -> Value {
        Value::Compound(entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect::<HashMap<_, _>>())
    }

    /// 1.18 以后的区块结构
    pub fn chunk(pos: ChunkPos, entities: Vec<Value>) -> Value {
        compound(vec![
            ("xPos", Value::Int(pos.x)),
            ("zPos", Value::Int(pos.z)),
            ("Status", Value::String("minecraft:full".into())),
            ("Entities", Value::List(entities)),
        ])
    }

    pub fn entity(id: &str, pos: (f64, f64, f64)) -> Value {
        compound(vec![
            ("id", Value::String(id.into())),
            (
                "Pos",
                Value::List(vec![Value::Double(pos.0), Value::Double(pos.1), Value::Double(pos.2)]),
            ),
        ])
    }

    /// 写一个区域文件，区块坐标必须都落在该区域内
    pub fn write_chunks(dir: &Path, chunks: &[(ChunkPos, Value)]) -> std::path::PathBuf {
        write_chunks_as(dir, chunks, Compression::Zlib)
    }

    pub fn write_chunks_as(dir: &Path, chunks: &[(ChunkPos, Value)], scheme: Compression) -> std::path::PathBuf {
        let region: RegionPos = chunks[0].0.region();
        let payloads: Vec<(usize, Vec<u8>)> = chunks
            .iter()
            .map(|(pos, tree)| {
                assert_eq!(pos.region(), region);
                (pos.local().index(), codec::encode(tree, scheme).unwrap())
            })
            .collect();
        let mut slots = vec![None; crate::coords::SLOT_COUNT];
        for (i, p) in &payloads {
            slots[*i] = Some(SlotImage {
                payload: p,
                timestamp: 77,
            });
        }
        let path = dir.join(region.file_name());
        write_region(&path, &slots, EmptyFilePolicy::Remove).unwrap();
        path
    }
}
