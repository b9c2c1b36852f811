//! 生成地图缓存图块
//!
//! 图块渲染由外部的 [`TileRenderer`] 完成，这里负责提取每个区块的高度图与生物群系，
//! 按缩放级别调用渲染器，并原子写入 `output/{zoom}/r.x.z.{ext}`。

use super::{decode_slot, RegionJob};
use crate::config::CacheConfig;
use crate::coords::{ChunkPos, LocalPos, RegionPos};
use crate::error::{Error, Result};
use crate::mca::commit_atomic;
use crate::pipeline::{Operation, WorkUnit};
use fastnbt::Value;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// 区块高度图
#[derive(Debug, Clone, PartialEq)]
pub enum Heightmap {
    /// 1.13 以后的 `Heightmaps.WORLD_SURFACE`，按位打包的 long 数组
    Packed(Vec<i64>),
    /// 旧版 `Level.HeightMap`，每列一个 int
    Plain(Vec<i32>),
}

/// 渲染一个区块需要的数据
#[derive(Debug, Clone, PartialEq)]
pub struct TileChunk {
    pub pos: ChunkPos,
    pub heightmap: Option<Heightmap>,
    pub biomes: Option<Value>,
}

pub struct TileRequest<'a> {
    pub region: RegionPos,
    pub zoom: u32,
    pub chunks: &'a [TileChunk],
}

/// 图块渲染器
pub trait TileRenderer: Send + Sync {
    /// 图块文件扩展名，如 `png`
    fn extension(&self) -> &str;

    /// 返回 `None` 表示该区域没有可渲染的内容
    fn render(&self, request: &TileRequest<'_>) -> Result<Option<Vec<u8>>>;
}

pub struct CacheParams {
    pub dir: PathBuf,
    pub output: PathBuf,
    /// 只生成这一级，`None` 时生成整个缩放金字塔
    pub zoom: Option<u32>,
    pub config: CacheConfig,
    pub renderer: Arc<dyn TileRenderer>,
}

pub struct CacheOperation {
    params: CacheParams,
    levels: Vec<u32>,
}

pub struct CacheJob {
    source: RegionJob,
    tiles: Vec<(u32, Option<Vec<u8>>)>,
}

impl CacheOperation {
    pub fn new(params: CacheParams) -> Self {
        let levels = match params.zoom {
            Some(z) => vec![z],
            None => params.config.zoom_levels(),
        };
        Self { params, levels }
    }

    fn tile_path(&self, zoom: u32, region: RegionPos) -> PathBuf {
        self.params.output.join(zoom.to_string()).join(format!(
            "r.{}.{}.{}",
            region.x,
            region.z,
            self.params.renderer.extension()
        ))
    }
}

fn extract(pos: ChunkPos, tree: &Value) -> TileChunk {
    let Value::Compound(root) = tree else {
        return TileChunk {
            pos,
            heightmap: None,
            biomes: None,
        };
    };
    let level = match root.get("Level") {
        Some(Value::Compound(level)) => Some(level),
        _ => None,
    };

    let packed = match root.get("Heightmaps") {
        Some(Value::Compound(maps)) => match maps.get("WORLD_SURFACE") {
            Some(Value::LongArray(a)) => Some(Heightmap::Packed(a.to_vec())),
            _ => None,
        },
        _ => None,
    };
    let heightmap = packed.or_else(|| match level?.get("HeightMap") {
        Some(Value::IntArray(a)) => Some(Heightmap::Plain(a.to_vec())),
        _ => None,
    });

    let biomes = level
        .and_then(|l| l.get("Biomes"))
        .or_else(|| root.get("Biomes"))
        .cloned();

    TileChunk {
        pos,
        heightmap,
        biomes,
    }
}

impl Operation for CacheOperation {
    type Job = CacheJob;

    fn name(&self) -> &'static str {
        "cache"
    }

    fn validate(&self) -> Result<()> {
        self.params.config.validate()?;
        if let Some(z) = self.params.zoom {
            if !self.params.config.zoom_levels().contains(&z) {
                return Err(Error::Validation(format!(
                    "缩放级别 {} 无效，可选: {:?}",
                    z,
                    self.params.config.zoom_levels()
                )));
            }
        }
        super::require_dir(&self.params.dir, "区域目录")?;
        if self.params.output.exists() {
            let mut entries = fs::read_dir(&self.params.output)?;
            if entries.next().is_some() {
                return Err(Error::Validation(format!(
                    "缓存输出目录不为空: {}",
                    self.params.output.display()
                )));
            }
        }
        Ok(())
    }

    fn discover(&self) -> Result<Vec<WorkUnit>> {
        for zoom in &self.levels {
            fs::create_dir_all(self.params.output.join(zoom.to_string()))?;
        }
        crate::pipeline::discover_regions(&self.params.dir)
    }

    fn load(&self, unit: &WorkUnit) -> Result<CacheJob> {
        Ok(CacheJob {
            source: RegionJob::load(unit)?,
            tiles: Vec::new(),
        })
    }

    fn process(&self, job: &mut CacheJob) -> Result<bool> {
        let region = job.source.unit.region;
        let mut chunks = Vec::new();
        for index in job.source.region.present_indices() {
            if let Some(tree) = decode_slot(&job.source.region, index)? {
                chunks.push(extract(region.chunk(LocalPos::from_index(index)), &tree));
            }
        }

        for &zoom in &self.levels {
            let request = TileRequest {
                region,
                zoom,
                chunks: &chunks,
            };
            let bytes = self.params.renderer.render(&request)?;
            job.tiles.push((zoom, bytes));
        }
        // 即使渲染结果为空，也要删除旧图块
        Ok(true)
    }

    fn write(&self, job: CacheJob) -> Result<()> {
        let region = job.source.unit.region;
        for (zoom, bytes) in job.tiles {
            let path = self.tile_path(zoom, region);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            if let Some(bytes) = bytes {
                commit_atomic(&path, &bytes, |_| Ok(()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::Pipeline;
    use fastnbt::LongArray;

    /// 输出 "zoom:区块数:有高度图的区块数"
    struct CountingRenderer;

    impl TileRenderer for CountingRenderer {
        fn extension(&self) -> &str {
            "txt"
        }

        fn render(&self, request: &TileRequest<'_>) -> Result<Option<Vec<u8>>> {
            if request.chunks.is_empty() {
                return Ok(None);
            }
            let with_height = request.chunks.iter().filter(|c| c.heightmap.is_some()).count();
            Ok(Some(
                format!("{}:{}:{}", request.zoom, request.chunks.len(), with_height).into_bytes(),
            ))
        }
    }

    struct FailingRenderer;

    impl TileRenderer for FailingRenderer {
        fn extension(&self) -> &str {
            "png"
        }

        fn render(&self, _request: &TileRequest<'_>) -> Result<Option<Vec<u8>>> {
            Err(Error::Render("no palette".to_string()))
        }
    }

    fn params(dir: &std::path::Path, zoom: Option<u32>, renderer: Arc<dyn TileRenderer>) -> CacheParams {
        CacheParams {
            dir: dir.join("region"),
            output: dir.join("cache"),
            zoom,
            config: CacheConfig { min_zoom: 1, max_zoom: 4 },
            renderer,
        }
    }

    #[test]
    fn extracts_modern_and_legacy_heightmaps() {
        let pos = ChunkPos::new(0, 0);
        let modern = compound(vec![(
            "Heightmaps",
            compound(vec![("WORLD_SURFACE", Value::LongArray(LongArray::new(vec![1, 2, 3])))]),
        )]);
        assert_eq!(extract(pos, &modern).heightmap, Some(Heightmap::Packed(vec![1, 2, 3])));

        let legacy = compound(vec![(
            "Level",
            compound(vec![
                ("HeightMap", Value::IntArray(fastnbt::IntArray::new(vec![64; 4]))),
                ("Biomes", Value::IntArray(fastnbt::IntArray::new(vec![1; 4]))),
            ]),
        )]);
        let tile = extract(pos, &legacy);
        assert_eq!(tile.heightmap, Some(Heightmap::Plain(vec![64; 4])));
        assert!(tile.biomes.is_some());

        assert_eq!(extract(pos, &chunk(pos, vec![])).heightmap, None);
    }

    #[test]
    fn renders_every_zoom_level() {
        let dir = tempfile::tempdir().unwrap();
        let world = dir.path().join("region");
        fs::create_dir(&world).unwrap();
        let a = ChunkPos::new(0, 0);
        let modern = compound(vec![(
            "Heightmaps",
            compound(vec![("WORLD_SURFACE", Value::LongArray(LongArray::new(vec![0; 37])))]),
        )]);
        write_chunks(&world, &[(a, modern), (ChunkPos::new(1, 0), chunk(ChunkPos::new(1, 0), vec![]))]);

        let op = Arc::new(CacheOperation::new(params(dir.path(), None, Arc::new(CountingRenderer))));
        let pipeline = Pipeline::new(PipelineConfig::with_threads(1, 1, 1, 1)).unwrap();
        let summary = pipeline.run(op, |_| {}).unwrap();
        assert_eq!(summary.written, 1);

        for zoom in [1, 2, 4] {
            let tile = dir.path().join("cache").join(zoom.to_string()).join("r.0.0.txt");
            assert_eq!(fs::read_to_string(tile).unwrap(), format!("{}:2:1", zoom));
        }
    }

    #[test]
    fn zoom_and_output_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("region")).unwrap();

        let op = CacheOperation::new(params(dir.path(), Some(3), Arc::new(CountingRenderer)));
        assert!(matches!(op.validate(), Err(Error::Validation(_))));
        let op = CacheOperation::new(params(dir.path(), Some(8), Arc::new(CountingRenderer)));
        assert!(matches!(op.validate(), Err(Error::Validation(_))));

        let op = CacheOperation::new(params(dir.path(), Some(2), Arc::new(CountingRenderer)));
        op.validate().unwrap();
        fs::create_dir_all(dir.path().join("cache")).unwrap();
        op.validate().unwrap();
        fs::write(dir.path().join("cache").join("stale.png"), b"x").unwrap();
        assert!(matches!(op.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn render_failure_is_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let world = dir.path().join("region");
        fs::create_dir(&world).unwrap();
        let a = ChunkPos::new(0, 0);
        write_chunks(&world, &[(a, chunk(a, vec![]))]);

        let op = Arc::new(CacheOperation::new(params(dir.path(), Some(1), Arc::new(FailingRenderer))));
        let pipeline = Pipeline::new(PipelineConfig::with_threads(1, 1, 1, 1)).unwrap();
        let summary = pipeline.run(op, |_| {}).unwrap();
        assert_eq!(summary.failed.len(), 1);
        assert!(!dir.path().join("cache").join("1").join("r.0.0.png").exists());
    }
}
