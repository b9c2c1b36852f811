//! 从另一个世界导入区块
//!
//! 工作单元是目标区域：每个源区域平移后最多落在 4 个目标区域里，
//! 每个目标单元读取自己的目标文件和所有重叠的源文件，目标文件只属于一个工作线程。

use super::decode_slot;
use crate::codec::{self, Compression};
use crate::coords::{chunk_to_block, chunk_to_region, LocalPos, RegionPos, REGION_CHUNKS};
use crate::error::{Error, Result};
use crate::mca::{EmptyFilePolicy, RegionFile};
use crate::pipeline::{discover_regions, Operation, WorkUnit};
use crate::selection::{EmptyRegionPolicy, SelectionSet};
use crate::tag;
use fastnbt::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

/// 垂直分段范围（闭区间），文本形式 `n`、`a:b`、`:b`、`a:`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl SectionRange {
    pub fn contains(&self, y: i32) -> bool {
        self.min.map_or(true, |min| y >= min) && self.max.map_or(true, |max| y <= max)
    }

    /// 逗号分隔的范围列表
    pub fn parse_list(s: &str) -> Result<Vec<SectionRange>> {
        s.split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for SectionRange {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bound = |t: &str| -> Result<Option<i32>> {
            let t = t.trim();
            if t.is_empty() {
                return Ok(None);
            }
            t.parse()
                .map(Some)
                .map_err(|_| Error::Validation(format!("无效的分段范围: {:?}", s)))
        };
        let range = match s.split_once(':') {
            Some((a, b)) => SectionRange {
                min: bound(a)?,
                max: bound(b)?,
            },
            None => {
                let n = bound(s)?.ok_or_else(|| Error::Validation("分段范围为空".to_string()))?;
                SectionRange {
                    min: Some(n),
                    max: Some(n),
                }
            }
        };
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                return Err(Error::Validation(format!("分段范围下限大于上限: {:?}", s)));
            }
        }
        Ok(range)
    }
}

impl fmt::Display for SectionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(a), Some(b)) if a == b => write!(f, "{}", a),
            (a, b) => {
                if let Some(a) = a {
                    write!(f, "{}", a)?;
                }
                f.write_str(":")?;
                if let Some(b) = b {
                    write!(f, "{}", b)?;
                }
                Ok(())
            }
        }
    }
}

pub struct ImportParams {
    /// 源世界的区域目录
    pub input: PathBuf,
    /// 目标区域目录，不存在时创建
    pub target: PathBuf,
    /// 区块偏移
    pub offset: (i32, i32),
    /// 覆盖目标中已存在的区块
    pub overwrite: bool,
    /// 目标坐标系下的选区
    pub selection: Option<SelectionSet>,
    pub policy: EmptyRegionPolicy,
    /// 只导入这些垂直分段，空表示全部
    pub sections: Vec<SectionRange>,
}

pub struct ImportOperation {
    params: ImportParams,
    sources: Mutex<BTreeMap<RegionPos, Vec<WorkUnit>>>,
}

pub struct ImportJob {
    region: RegionPos,
    target: RegionFile,
    sources: Vec<(RegionPos, RegionFile)>,
}

impl ImportOperation {
    pub fn new(params: ImportParams) -> Self {
        Self {
            params,
            sources: Mutex::new(BTreeMap::new()),
        }
    }

    fn is_raw_copy(&self) -> bool {
        self.params.offset == (0, 0) && self.params.sections.is_empty()
    }

    fn in_sections(&self, y: i32) -> bool {
        self.params.sections.iter().any(|r| r.contains(y))
    }

    /// 源区域平移后覆盖的目标区域
    fn targets_of(&self, source: RegionPos) -> Vec<RegionPos> {
        let (dx, dz) = self.params.offset;
        let min = source.min_chunk();
        let span = |lo: i32, d: i32| {
            let first = lo.saturating_add(d);
            let last = (lo + REGION_CHUNKS - 1).saturating_add(d);
            chunk_to_region(first)..=chunk_to_region(last)
        };
        let xs = span(min.x, dx);
        let zs = span(min.z, dz);
        zs.flat_map(|z| xs.clone().map(move |x| RegionPos::new(x, z)))
            .collect()
    }

    /// 生成一个目标区块的新负载
    fn build_payload(&self, payload: &[u8], existing: Option<Value>) -> Result<Vec<u8>> {
        let scheme = Compression::of(payload)?;
        let mut tree = codec::decode(payload)?;
        let (dx, dz) = self.params.offset;
        relocate(&mut tree, dx, dz);

        if !self.params.sections.is_empty() {
            match existing {
                Some(mut target) => {
                    let incoming: Vec<Value> = take_sections(&mut tree)
                        .into_iter()
                        .filter(|s| self.in_sections(section_y(s)))
                        .collect();
                    let mut kept: Vec<Value> = take_sections(&mut target)
                        .into_iter()
                        .filter(|s| !self.in_sections(section_y(s)))
                        .collect();
                    kept.extend(incoming);
                    kept.sort_by_key(section_y);
                    put_sections(&mut target, kept);
                    tree = target;
                }
                None => {
                    let kept = take_sections(&mut tree)
                        .into_iter()
                        .filter(|s| self.in_sections(section_y(s)))
                        .collect();
                    put_sections(&mut tree, kept);
                }
            }
        }

        codec::encode(&tree, scheme)
    }
}

impl Operation for ImportOperation {
    type Job = ImportJob;

    fn name(&self) -> &'static str {
        "import"
    }

    fn validate(&self) -> Result<()> {
        super::require_dir(&self.params.input, "导入目录")?;
        // 目标文件同时是其他单元的源文件，原地导入会读到已改写的数据
        if same_dir(&self.params.input, &self.params.target) {
            return Err(Error::Validation(format!(
                "源目录与目标目录不能相同: {}",
                self.params.input.display()
            )));
        }
        Ok(())
    }

    fn discover(&self) -> Result<Vec<WorkUnit>> {
        fs::create_dir_all(&self.params.target)?;

        let mut by_target: BTreeMap<RegionPos, Vec<WorkUnit>> = BTreeMap::new();
        for source in discover_regions(&self.params.input)? {
            for target in self.targets_of(source.region) {
                let wanted = self
                    .params
                    .selection
                    .as_ref()
                    .map_or(true, |s| s.contains_region(target));
                if wanted {
                    by_target.entry(target).or_default().push(source.clone());
                }
            }
        }

        let units = by_target
            .keys()
            .map(|&region| WorkUnit::new(region, self.params.target.join(region.file_name())))
            .collect();
        *self.sources.lock().unwrap_or_else(|e| e.into_inner()) = by_target;
        Ok(units)
    }

    fn load(&self, unit: &WorkUnit) -> Result<ImportJob> {
        let sources = self
            .sources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&unit.region)
            .cloned()
            .unwrap_or_default();
        let sources = sources
            .iter()
            .map(|s| Ok((s.region, RegionFile::open(&s.path)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ImportJob {
            region: unit.region,
            target: RegionFile::open_or_empty(&unit.path)?,
            sources,
        })
    }

    fn process(&self, job: &mut ImportJob) -> Result<bool> {
        let (dx, dz) = self.params.offset;
        let mut imported = 0;

        for (source_region, source) in &job.sources {
            for index in source.present_indices() {
                let Some(dest) = source_region.chunk(LocalPos::from_index(index)).offset(dx, dz) else {
                    continue;
                };
                if dest.region() != job.region {
                    continue;
                }
                if let Some(selection) = &self.params.selection {
                    if !selection.contains(dest, self.params.policy) {
                        continue;
                    }
                }
                let slot = dest.local().index();
                let exists = job.target.is_present(slot);
                if exists && !self.params.overwrite {
                    continue;
                }
                let Some(payload) = source.read_chunk_payload(index)? else {
                    continue;
                };
                let timestamp = source.timestamp(index);

                let new_payload = if self.is_raw_copy() {
                    payload.to_vec()
                } else {
                    let existing = if exists { decode_slot(&job.target, slot)? } else { None };
                    self.build_payload(payload, existing)?
                };
                job.target.set_payload_with_timestamp(slot, new_payload, timestamp);
                imported += 1;
            }
        }

        if imported > 0 {
            log::debug!("{} 导入 {} 个区块", job.region.file_name(), imported);
        }
        Ok(imported > 0)
    }

    fn write(&self, job: ImportJob) -> Result<()> {
        job.target.save(EmptyFilePolicy::KeepHeader)?;
        Ok(())
    }
}

// ============== 区块平移 ==============

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn shift_int(node: &mut Value, key: &str, delta: i32) {
    if let Value::Compound(map) = node {
        if let Some(Value::Int(v)) = map.get_mut(key) {
            *v += delta;
        }
    }
}

fn shift_pos(entity: &mut Value, bdx: f64, bdz: f64) {
    if let Value::Compound(map) = entity {
        if let Some(Value::List(pos)) = map.get_mut("Pos") {
            if let Some(Value::Double(x)) = pos.get_mut(0) {
                *x += bdx;
            }
            if let Some(Value::Double(z)) = pos.get_mut(2) {
                *z += bdz;
            }
        }
        // 骑乘的实体
        if let Some(Value::List(passengers)) = map.get_mut("Passengers") {
            for p in passengers {
                shift_pos(p, bdx, bdz);
            }
        }
    }
}

fn for_each_in_list(node: &mut Value, key: &str, mut f: impl FnMut(&mut Value)) {
    if let Value::Compound(map) = node {
        if let Some(Value::List(list)) = map.get_mut(key) {
            list.iter_mut().for_each(&mut f);
        }
    }
}

/// 按区块偏移修正区块内的绝对坐标
fn relocate(tree: &mut Value, dx: i32, dz: i32) {
    if dx == 0 && dz == 0 {
        return;
    }
    let (bdx, bdz) = (chunk_to_block(dx), chunk_to_block(dz));

    let shift_node = |node: &mut Value| {
        shift_int(node, "xPos", dx);
        shift_int(node, "zPos", dz);
        for_each_in_list(node, "Entities", |e| shift_pos(e, bdx as f64, bdz as f64));
        for key in [
            "TileEntities",
            "block_entities",
            "TileTicks",
            "LiquidTicks",
            "block_ticks",
            "fluid_ticks",
        ] {
            for_each_in_list(node, key, |t| {
                shift_int(t, "x", bdx);
                shift_int(t, "z", bdz);
            });
        }
    };

    shift_node(tree);
    if let Value::Compound(map) = tree {
        if let Some(level) = map.get_mut("Level") {
            shift_node(level);
        }
    }
}

// ============== 垂直分段 ==============

fn section_y(section: &Value) -> i32 {
    match section {
        Value::Compound(map) => map.get("Y").and_then(tag::as_i64).unwrap_or(0) as i32,
        _ => 0,
    }
}

/// 分段列表所在的节点和键名
fn sections_slot(tree: &mut Value) -> Option<&mut Vec<Value>> {
    let Value::Compound(map) = tree else {
        return None;
    };
    if map.contains_key("sections") {
        return match map.get_mut("sections") {
            Some(Value::List(list)) => Some(list),
            _ => None,
        };
    }
    match map.get_mut("Level") {
        Some(Value::Compound(level)) => match level.get_mut("Sections") {
            Some(Value::List(list)) => Some(list),
            _ => None,
        },
        _ => None,
    }
}

fn take_sections(tree: &mut Value) -> Vec<Value> {
    sections_slot(tree).map(std::mem::take).unwrap_or_default()
}

fn put_sections(tree: &mut Value, sections: Vec<Value>) {
    if let Some(slot) = sections_slot(tree) {
        *slot = sections;
    }
}
