//! 错误类型
//!
//! 区域文件、区块编解码与标签树相关的错误都属于"单文件错误"：
//! 记录日志后跳过该文件，批处理继续。参数校验与过滤器错误在任何 I/O 之前报告，
//! 流水线不会启动。

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// 区域文件头损坏或长度不足
    #[error("区域文件格式错误 {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },

    /// 区块数据块损坏
    #[error("区块数据损坏 {path:?} 槽位 {index}: {reason}")]
    ChunkCorrupt {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("不支持的压缩方式: {0}")]
    UnsupportedCompression(u8),

    /// NBT 编码错误或压缩流损坏
    #[error("二进制数据格式错误: {0}")]
    BinaryFormat(String),

    #[error("标签类型不匹配 {path}: 期望 {expected}, 实际 {found}")]
    TagTypeMismatch {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("I/O 错误: {0}")]
    Io(#[from] io::Error),

    /// 参数组合无效
    #[error("参数无效: {0}")]
    Validation(String),

    /// 过滤表达式无效（由外部编译器报告）
    #[error("过滤表达式无效: {0}")]
    Predicate(String),

    #[error("渲染失败: {0}")]
    Render(String),

    #[error("工作线程崩溃: {0}")]
    WorkerPanic(String),

    #[error("批处理已中止: {0}")]
    Aborted(Box<Error>),

    #[error("批处理已取消")]
    Cancelled,
}

impl Error {
    /// 是否为致命错误：致命错误会停止接纳新的区域文件
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::Predicate(_)
                | Error::WorkerPanic(_)
                | Error::Aborted(_)
                | Error::Cancelled
        )
    }

    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, index: usize, reason: impl Into<String>) -> Self {
        Error::ChunkCorrupt {
            path: path.into(),
            index,
            reason: reason.into(),
        }
    }
}

impl From<fastnbt::error::Error> for Error {
    fn from(e: fastnbt::error::Error) -> Self {
        Error::BinaryFormat(e.to_string())
    }
}
