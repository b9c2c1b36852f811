//! 按 ID 删除选中区块里的实体、方块实体和计划刻

use super::{decode_slot, store_slot, RegionJob};
use crate::coords::LocalPos;
use crate::error::{Error, Result};
use crate::mca::EmptyFilePolicy;
use crate::pipeline::{discover_regions, Operation, WorkUnit};
use crate::selection::{EmptyRegionPolicy, SelectionSet};
use crate::tag;
use fastnbt::Value;
use std::collections::HashSet;
use std::path::PathBuf;

/// 扫描的列表及其 ID 键
const LISTS: [(&str, &str); 3] = [("Entities", "id"), ("TileEntities", "id"), ("TileTicks", "i")];

/// 掉落物和物品展示框还要检查所含物品
const ITEM_HOLDERS: [&str; 2] = ["minecraft:item", "minecraft:item_frame"];

/// ID 集合；带命名空间的 ID 同时按冒号后的部分匹配
#[derive(Debug, Clone, Default)]
pub struct IdSet(HashSet<String>);

impl IdSet {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for id in ids {
            let id = id.as_ref().trim();
            if id.is_empty() {
                continue;
            }
            if let Some((_, path)) = id.split_once(':') {
                set.insert(path.to_string());
            }
            set.insert(id.to_string());
        }
        Self(set)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    fn matches(&self, entry: &Value, key: &str) -> bool {
        let Some(id) = tag::get_str(entry, key) else {
            return false;
        };
        if self.contains(id) {
            return true;
        }
        if ITEM_HOLDERS.contains(&id) {
            if let Value::Compound(map) = entry {
                if let Some(item) = map.get("Item") {
                    return tag::get_str(item, "id").map_or(false, |i| self.contains(i));
                }
            }
        }
        false
    }
}

/// 从一棵区块树中删除命中的条目，返回删除数量
pub fn strip_ids(tree: &mut Value, ids: &IdSet) -> usize {
    let Value::Compound(root) = tree else {
        return 0;
    };
    let legacy = matches!(root.get("Level"), Some(Value::Compound(_)));
    let node = if legacy {
        match root.get_mut("Level") {
            Some(Value::Compound(level)) => level,
            _ => return 0,
        }
    } else {
        root
    };
    let mut removed = 0;
    for (list, key) in LISTS {
        if let Some(Value::List(entries)) = node.get_mut(list) {
            removed += tag::remove_where(entries, |e| ids.matches(e, key));
        }
    }
    removed
}

pub struct DeleteBlockParams {
    pub dir: PathBuf,
    pub selection: SelectionSet,
    pub policy: EmptyRegionPolicy,
    pub ids: IdSet,
}

pub struct DeleteBlockOperation {
    params: DeleteBlockParams,
}

impl DeleteBlockOperation {
    pub fn new(params: DeleteBlockParams) -> Self {
        Self { params }
    }
}

impl Operation for DeleteBlockOperation {
    type Job = RegionJob;

    fn name(&self) -> &'static str {
        "delete-block"
    }

    fn validate(&self) -> Result<()> {
        if self.params.selection.is_empty() {
            return Err(Error::Validation("删除方块需要选区".to_string()));
        }
        if self.params.ids.is_empty() {
            return Err(Error::Validation("删除方块需要至少一个 ID".to_string()));
        }
        super::require_dir(&self.params.dir, "区域目录")
    }

    fn discover(&self) -> Result<Vec<WorkUnit>> {
        Ok(discover_regions(&self.params.dir)?
            .into_iter()
            .filter(|u| self.params.selection.contains_region(u.region))
            .collect())
    }

    fn load(&self, unit: &WorkUnit) -> Result<RegionJob> {
        RegionJob::load(unit)
    }

    fn process(&self, job: &mut RegionJob) -> Result<bool> {
        let region = job.unit.region;
        let Some(slots) = self.params.selection.slots_in(region, self.params.policy) else {
            return Ok(false);
        };

        let mut removed = 0;
        for index in slots {
            let Some(mut tree) = decode_slot(&job.region, index)? else {
                continue;
            };
            let n = strip_ids(&mut tree, &self.params.ids);
            if n > 0 {
                log::debug!("区块 {} 删除 {} 项", region.chunk(LocalPos::from_index(index)), n);
                store_slot(&mut job.region, index, &tree)?;
                removed += n;
            }
        }
        Ok(removed > 0)
    }

    fn write(&self, job: RegionJob) -> Result<()> {
        job.region.save(EmptyFilePolicy::KeepHeader)?;
        Ok(())
    }
}
