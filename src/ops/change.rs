//! 修改区块标签
//!
//! 指令文本形式：
//! - `path=value`：设置
//! - `path+=value`：向列表追加
//! - `!path`：删除

use super::{decode_slot, store_slot, ChunkMatcher, RegionJob};
use crate::coords::LocalPos;
use crate::error::{Error, Result};
use crate::mca::EmptyFilePolicy;
use crate::nbt_text;
use crate::pipeline::{Operation, WorkUnit};
use crate::tag::{self, TagPath};
use fastnbt::Value;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 一条标签修改指令
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeDirective {
    Set { path: TagPath, value: Value },
    Delete { path: TagPath },
    Append { path: TagPath, value: Value },
}

impl ChangeDirective {
    pub fn path(&self) -> &TagPath {
        match self {
            ChangeDirective::Set { path, .. }
            | ChangeDirective::Delete { path }
            | ChangeDirective::Append { path, .. } => path,
        }
    }

    /// 应用到一棵标签树，返回是否有修改
    pub fn apply(&self, tree: &mut Value, force: bool) -> Result<bool> {
        match self {
            ChangeDirective::Set { path, value } => tag::set(tree, path, value.clone(), force),
            ChangeDirective::Delete { path } => Ok(tag::remove(tree, path).is_some()),
            ChangeDirective::Append { path, value } => tag::append(tree, path, value.clone(), force),
        }
    }
}

impl FromStr for ChangeDirective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix('!') {
            return Ok(ChangeDirective::Delete {
                path: path.trim().parse()?,
            });
        }
        let eq = s
            .find('=')
            .ok_or_else(|| Error::Validation(format!("无效的修改指令: {:?}", s)))?;
        let (lhs, value) = (&s[..eq], &s[eq + 1..]);
        let value = nbt_text::parse_value(value)?;
        match lhs.strip_suffix('+') {
            Some(path) => Ok(ChangeDirective::Append {
                path: path.trim().parse()?,
                value,
            }),
            None => Ok(ChangeDirective::Set {
                path: lhs.trim().parse()?,
                value,
            }),
        }
    }
}

impl fmt::Display for ChangeDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeDirective::Set { path, value } => write!(f, "{} = {}", path, tag::kind_name(value)),
            ChangeDirective::Delete { path } => write!(f, "!{}", path),
            ChangeDirective::Append { path, value } => write!(f, "{} += {}", path, tag::kind_name(value)),
        }
    }
}

pub struct ChangeParams {
    pub dir: PathBuf,
    /// 不限制时修改所有区块
    pub matcher: ChunkMatcher,
    pub directives: Vec<ChangeDirective>,
    /// 缺失的中间节点按需创建
    pub force: bool,
}

pub struct ChangeOperation {
    params: ChangeParams,
}

impl ChangeOperation {
    pub fn new(params: ChangeParams) -> Self {
        Self { params }
    }
}

impl Operation for ChangeOperation {
    type Job = RegionJob;

    fn name(&self) -> &'static str {
        "change"
    }

    fn validate(&self) -> Result<()> {
        if self.params.directives.is_empty() {
            return Err(Error::Validation("没有修改指令".to_string()));
        }
        if self.params.directives.iter().any(|d| d.path().is_empty()) {
            return Err(Error::Validation("修改指令路径为空".to_string()));
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
        let mut changed = 0;

        for index in self.params.matcher.candidates(region, &job.region) {
            let Some(mut tree) = decode_slot(&job.region, index)? else {
                continue;
            };
            let chunk = region.chunk(LocalPos::from_index(index));
            if !self.params.matcher.accepts(chunk, &tree) {
                continue;
            }

            let mut applied = false;
            for directive in &self.params.directives {
                if directive.apply(&mut tree, self.params.force)? {
                    applied = true;
                } else {
                    log::debug!("区块 {} 跳过指令 {}", chunk, directive);
                }
            }
            if applied {
                store_slot(&mut job.region, index, &tree)?;
                changed += 1;
            }
        }

        if changed > 0 {
            log::debug!("{} 修改 {} 个区块", job.unit.name(), changed);
        }
        Ok(changed > 0)
    }

    fn write(&self, job: RegionJob) -> Result<()> {
        job.region.save(EmptyFilePolicy::KeepHeader)?;
        Ok(())
    }
}
