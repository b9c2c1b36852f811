//! 删除匹配的区块

use super::{ChunkMatcher, RegionJob};
use crate::error::{Error, Result};
use crate::mca::{EmptyFilePolicy, SaveOutcome};
use crate::pipeline::{Operation, WorkUnit};
use std::path::PathBuf;

pub struct DeleteParams {
    pub dir: PathBuf,
    pub matcher: ChunkMatcher,
    /// 区块全部删除后如何处理文件
    pub empty_file: EmptyFilePolicy,
}

pub struct DeleteOperation {
    params: DeleteParams,
}

impl DeleteOperation {
    pub fn new(params: DeleteParams) -> Self {
        Self { params }
    }
}

impl Operation for DeleteOperation {
    type Job = RegionJob;

    fn name(&self) -> &'static str {
        "delete"
    }

    fn validate(&self) -> Result<()> {
        if self.params.matcher.is_unrestricted() {
            return Err(Error::Validation("删除需要过滤条件或选区".to_string()));
        }
        super::require_dir(&self.params.dir, "区域目录")
    }

    fn discover(&self) -> Result<Vec<WorkUnit>> {
        super::discover_matching(&self.params.dir, &self.params.matcher)
    }

    fn load(&self, unit: &WorkUnit) -> Result<RegionJob> {
        RegionJob::load(unit)
    }

    fn process(&self, job: &mut RegionJob) -> Result<bool> {
        let region = job.unit.region;
        let mut doomed = Vec::new();
        for index in self.params.matcher.candidates(region, &job.region) {
            if self.params.matcher.matches_slot(region, &job.region, index)? {
                doomed.push(index);
            }
        }
        for &index in &doomed {
            job.region.clear(index);
        }
        if !doomed.is_empty() {
            log::debug!("{} 删除 {} 个区块", job.unit.name(), doomed.len());
        }
        Ok(!doomed.is_empty())
    }

    fn write(&self, job: RegionJob) -> Result<()> {
        if job.region.save(self.params.empty_file)? == SaveOutcome::Removed {
            log::info!("{} 已无区块，文件已删除", job.unit.name());
        }
        Ok(())
    }
}
