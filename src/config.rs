//! 配置文件加载与管理

use crate::error::{Error, Result as CoreResult};
use crate::mca::EmptyFilePolicy;
use crate::selection::EmptyRegionPolicy;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 本地配置文件名
pub const LOCAL_CONFIG: &str = "mcabatch.toml";

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 流水线配置
    pub pipeline: PipelineConfig,
    /// 选区配置
    pub selection: SelectionConfig,
    /// 区域文件配置
    pub region: RegionConfig,
    /// 地图缓存配置
    pub cache: CacheConfig,
}

/// 流水线配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 读取线程数
    pub load_threads: usize,
    /// 处理线程数
    pub process_threads: usize,
    /// 写入线程数
    pub write_threads: usize,
    /// 同时加载到内存的区域文件上限
    pub max_loaded_files: usize,
    /// 任一文件出错即中止
    pub fail_fast: bool,
}

/// 选区配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// 显式空区域的含义
    pub empty_region: EmptyRegionPolicy,
}

/// 区域文件配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// 所有区块被删除后如何处理文件
    pub empty_file: EmptyFilePolicy,
}

/// 地图缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 最小缩放级别（2 的幂）
    pub min_zoom: u32,
    /// 最大缩放级别（2 的幂）
    pub max_zoom: u32,
}

// ============== 默认值 ==============

impl Default for PipelineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            load_threads: 1,
            process_threads: cpus,
            write_threads: 4,
            max_loaded_files: (cpus + cpus / 2).max(1),
            fail_fast: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            min_zoom: 1,
            max_zoom: 16,
        }
    }
}

// ============== 校验 ==============

impl PipelineConfig {
    /// 固定线程数的配置，主要用于测试
    pub fn with_threads(load: usize, process: usize, write: usize, max_loaded_files: usize) -> Self {
        Self {
            load_threads: load,
            process_threads: process,
            write_threads: write,
            max_loaded_files,
            fail_fast: false,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        for (name, value) in [
            ("load_threads", self.load_threads),
            ("process_threads", self.process_threads),
            ("write_threads", self.write_threads),
            ("max_loaded_files", self.max_loaded_files),
        ] {
            if value == 0 {
                return Err(Error::Validation(format!("{} 必须为正整数", name)));
            }
        }
        Ok(())
    }
}

impl CacheConfig {
    /// 缩放金字塔：min_zoom 到 max_zoom 之间的 2 的幂
    pub fn zoom_levels(&self) -> Vec<u32> {
        let mut levels = Vec::new();
        let mut z = self.min_zoom.max(1);
        while z <= self.max_zoom {
            levels.push(z);
            match z.checked_mul(2) {
                Some(next) => z = next,
                None => break,
            }
        }
        levels
    }

    pub fn validate(&self) -> CoreResult<()> {
        if !self.min_zoom.is_power_of_two() || !self.max_zoom.is_power_of_two() {
            return Err(Error::Validation(format!(
                "缩放级别必须是 2 的幂: {}..{}",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.min_zoom > self.max_zoom {
            return Err(Error::Validation(format!(
                "最小缩放级别 {} 大于最大缩放级别 {}",
                self.min_zoom, self.max_zoom
            )));
        }
        Ok(())
    }
}

impl Config {
    pub fn validate(&self) -> CoreResult<()> {
        self.pipeline.validate()?;
        self.cache.validate()
    }
}

// ============== 配置加载 ==============

impl Config {
    /// 从文件加载配置
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// 获取默认配置文件路径
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("mcabatch").join("config.toml"))
    }

    /// 按优先级加载配置：
    /// 1. 当前目录的 mcabatch.toml
    /// 2. 用户配置目录的 config.toml
    /// 3. 默认配置
    pub fn load() -> Self {
        let local_config = Path::new(LOCAL_CONFIG);
        if local_config.exists() {
            match Self::load_from_file(local_config) {
                Ok(config) => {
                    log::info!("已加载配置: {}", LOCAL_CONFIG);
                    return config;
                }
                Err(e) => log::warn!("无法加载配置 {}: {}", LOCAL_CONFIG, e),
            }
        }

        if let Some(user_config) = Self::default_config_path() {
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("已加载配置: {}", user_config.display());
                        return config;
                    }
                    Err(e) => log::warn!("无法加载配置 {}: {}", user_config.display(), e),
                }
            }
        }

        Self::default()
    }
}
