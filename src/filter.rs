//! 区块过滤条件
//!
//! 过滤表达式由外部编译成闭包，这里只约定调用方式：输入区块坐标与解码后的标签树，
//! 返回是否命中。闭包必须是纯函数，可被多个工作线程并发调用。

use crate::coords::ChunkPos;
use fastnbt::Value;
use std::fmt;
use std::sync::Arc;

type PredicateFn = dyn Fn(ChunkPos, &Value) -> bool + Send + Sync;

#[derive(Clone)]
pub struct ChunkFilter(Arc<PredicateFn>);

impl ChunkFilter {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(ChunkPos, &Value) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[inline]
    pub fn matches(&self, pos: ChunkPos, tree: &Value) -> bool {
        (self.0)(pos, tree)
    }
}

impl fmt::Debug for ChunkFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChunkFilter(..)")
    }
}
