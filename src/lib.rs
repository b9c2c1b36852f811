//! Minecraft 区域文件批量编辑工具
//!
//! 以区域文件为单位，在多阶段并发流水线上对世界执行选择、导出、导入、删除、
//! 字段修改、地图缓存与按 ID 删除实体等批处理操作。

pub mod codec;
pub mod config;
pub mod coords;
pub mod error;
pub mod filter;
pub mod mca;
pub mod nbt_text;
pub mod ops;
pub mod pipeline;
pub mod selection;
pub mod tag;

pub use config::Config;
pub use coords::{ChunkPos, LocalPos, RegionPos};
pub use error::{Error, Result};
pub use filter::ChunkFilter;
pub use mca::{EmptyFilePolicy, RegionFile};
pub use pipeline::{Operation, Pipeline, PipelineHandle, Progress, Summary, WorkUnit};
pub use selection::{EmptyRegionPolicy, SelectionSet};
