//! 按过滤条件选择区块，结果导出为 CSV

use super::{decode_slot, ChunkMatcher, RegionJob};
use crate::coords::LocalPos;
use crate::error::Result;
use crate::filter::ChunkFilter;
use crate::pipeline::{Operation, Pipeline, Progress, Summary, WorkUnit};
use crate::selection::SelectionSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub struct SelectParams {
    pub dir: PathBuf,
    pub filter: ChunkFilter,
    /// 命中区块周围额外选中的半径（区块）
    pub radius: u32,
}

pub struct SelectOperation {
    params: SelectParams,
    matcher: ChunkMatcher,
    selected: Mutex<SelectionSet>,
}

impl SelectOperation {
    pub fn new(params: SelectParams) -> Self {
        let matcher = ChunkMatcher {
            filter: Some(params.filter.clone()),
            ..ChunkMatcher::default()
        };
        Self {
            params,
            matcher,
            selected: Mutex::new(SelectionSet::new()),
        }
    }

    /// 当前已选中的区块
    pub fn selection(&self) -> SelectionSet {
        self.selected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn into_selection(self) -> SelectionSet {
        self.selected.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl Operation for SelectOperation {
    type Job = RegionJob;

    fn name(&self) -> &'static str {
        "select"
    }

    fn validate(&self) -> Result<()> {
        super::require_dir(&self.params.dir, "区域目录")
    }

    fn discover(&self) -> Result<Vec<WorkUnit>> {
        super::discover_matching(&self.params.dir, &self.matcher)
    }

    fn load(&self, unit: &WorkUnit) -> Result<RegionJob> {
        RegionJob::load(unit)
    }

    fn process(&self, job: &mut RegionJob) -> Result<bool> {
        let region = job.unit.region;
        let mut local = SelectionSet::new();
        for index in job.region.present_indices() {
            let chunk = region.chunk(LocalPos::from_index(index));
            if let Some(tree) = decode_slot(&job.region, index)? {
                if self.matcher.accepts(chunk, &tree) {
                    local.insert(chunk);
                }
            }
        }
        if !local.is_empty() {
            log::debug!("{} 选中 {} 个区块", job.unit.name(), local.chunk_count());
            let local = local.expand(self.params.radius);
            self.selected
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .merge(local);
        }
        Ok(false)
    }

    fn write(&self, _job: RegionJob) -> Result<()> {
        Ok(())
    }
}

/// 运行选择并把结果写入 CSV
pub fn run_to_csv<P>(
    pipeline: &Pipeline,
    params: SelectParams,
    csv: &Path,
    on_progress: P,
) -> Result<(Summary, SelectionSet)>
where
    P: FnMut(&Progress),
{
    let op = Arc::new(SelectOperation::new(params));
    let summary = pipeline.run(Arc::clone(&op), on_progress)?;
    let selection = match Arc::try_unwrap(op) {
        Ok(op) => op.into_selection(),
        Err(op) => op.selection(),
    };
    selection.save_csv(csv)?;
    log::info!("已选中 {} 个区块，写入 {}", selection.chunk_count(), csv.display());
    Ok((summary, selection))
}
