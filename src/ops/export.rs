//! 导出区块到另一个目录，负载与时间戳原样复制

use super::{ChunkMatcher, RegionJob};
use crate::error::{Error, Result};
use crate::mca::{EmptyFilePolicy, RegionFile};
use crate::pipeline::{Operation, WorkUnit};
use std::fs;
use std::path::PathBuf;

pub struct ExportParams {
    pub dir: PathBuf,
    pub output: PathBuf,
    pub matcher: ChunkMatcher,
}

pub struct ExportOperation {
    params: ExportParams,
}

pub struct ExportJob {
    source: RegionJob,
    target: Option<RegionFile>,
}

impl ExportOperation {
    pub fn new(params: ExportParams) -> Self {
        Self { params }
    }
}

impl Operation for ExportOperation {
    type Job = ExportJob;

    fn name(&self) -> &'static str {
        "export"
    }

    fn validate(&self) -> Result<()> {
        if self.params.matcher.is_unrestricted() {
            return Err(Error::Validation("导出需要过滤条件或选区".to_string()));
        }
        super::require_dir(&self.params.dir, "区域目录")?;
        if self.params.output == self.params.dir {
            return Err(Error::Validation("输出目录不能与区域目录相同".to_string()));
        }
        Ok(())
    }

    fn discover(&self) -> Result<Vec<WorkUnit>> {
        fs::create_dir_all(&self.params.output)?;
        super::discover_matching(&self.params.dir, &self.params.matcher)
    }

    fn load(&self, unit: &WorkUnit) -> Result<ExportJob> {
        Ok(ExportJob {
            source: RegionJob::load(unit)?,
            target: None,
        })
    }

    fn process(&self, job: &mut ExportJob) -> Result<bool> {
        let source = &job.source;
        let region = source.unit.region;
        let mut target = RegionFile::empty(&self.params.output.join(region.file_name()));
        let mut copied = 0;

        for index in self.params.matcher.candidates(region, &source.region) {
            if !self.params.matcher.matches_slot(region, &source.region, index)? {
                continue;
            }
            if let Some(payload) = source.region.read_chunk_payload(index)? {
                target.set_payload_with_timestamp(index, payload.to_vec(), source.region.timestamp(index));
                copied += 1;
            }
        }

        if copied == 0 {
            return Ok(false);
        }
        log::debug!("{} 导出 {} 个区块", source.unit.name(), copied);
        job.target = Some(target);
        Ok(true)
    }

    fn write(&self, job: ExportJob) -> Result<()> {
        if let Some(target) = job.target {
            target.save(EmptyFilePolicy::Remove)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::config::PipelineConfig;
    use crate::coords::ChunkPos;
    use crate::pipeline::Pipeline;
    use crate::selection::{EmptyRegionPolicy, SelectionSet};
    use std::sync::Arc;

    #[test]
    fn exports_selected_chunks_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let world = dir.path().join("region");
        let output = dir.path().join("exported");
        fs::create_dir(&world).unwrap();

        let a = ChunkPos::new(3, 4);
        let b = ChunkPos::new(5, 6);
        write_chunks(&world, &[(a, chunk(a, vec![])), (b, chunk(b, vec![]))]);
        let other = ChunkPos::new(-1, 0);
        write_chunks(&world, &[(other, chunk(other, vec![]))]);

        let selection: SelectionSet = [a].into_iter().collect();
        let op = Arc::new(ExportOperation::new(ExportParams {
            dir: world.clone(),
            output: output.clone(),
            matcher: ChunkMatcher::new(None, Some(selection), EmptyRegionPolicy::Nothing),
        }));
        let pipeline = Pipeline::new(PipelineConfig::with_threads(1, 1, 1, 1)).unwrap();
        let summary = pipeline.run(op, |_| {}).unwrap();
        // r.-1.0.mca 不在选区中，不读取
        assert_eq!(summary.total, 1);
        assert_eq!(summary.written, 1);

        let source = RegionFile::open(&world.join("r.0.0.mca")).unwrap();
        let exported = RegionFile::open(&output.join("r.0.0.mca")).unwrap();
        let i = a.local().index();
        assert_eq!(exported.present_indices(), vec![i]);
        assert_eq!(exported.read_chunk_payload(i).unwrap(), source.read_chunk_payload(i).unwrap());
        assert_eq!(exported.timestamp(i), 77);
        assert!(!output.join("r.-1.0.mca").exists());
    }

    #[test]
    fn unrestricted_export_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let op = ExportOperation::new(ExportParams {
            dir: dir.path().to_path_buf(),
            output: dir.path().join("out"),
            matcher: ChunkMatcher::all(),
        });
        assert!(matches!(op.validate(), Err(Error::Validation(_))));
    }
}
