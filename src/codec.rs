//! 区块负载编解码
//!
//! 负载格式：1 字节压缩方式 + 压缩后的 NBT。1 = Gzip，2 = Zlib。

use crate::error::{Error, Result};
use fastnbt::Value;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::{Read, Write};

/// 压缩方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
}

impl Compression {
    pub fn id(self) -> u8 {
        match self {
            Compression::Gzip => 1,
            Compression::Zlib => 2,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            1 => Ok(Compression::Gzip),
            2 => Ok(Compression::Zlib),
            other => Err(Error::UnsupportedCompression(other)),
        }
    }

    /// 读取已有负载的压缩方式
    pub fn of(payload: &[u8]) -> Result<Self> {
        match payload.first() {
            Some(&id) => Self::from_id(id),
            None => Err(Error::BinaryFormat("负载为空".to_string())),
        }
    }
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zlib
    }
}

/// 解压并解析区块负载
pub fn decode(payload: &[u8]) -> Result<Value> {
    let scheme = Compression::of(payload)?;
    let compressed = &payload[1..];

    let mut nbt_data = Vec::new();
    let read = match scheme {
        Compression::Gzip => GzDecoder::new(compressed).read_to_end(&mut nbt_data),
        Compression::Zlib => ZlibDecoder::new(compressed).read_to_end(&mut nbt_data),
    };
    read.map_err(|e| Error::BinaryFormat(format!("解压失败: {}", e)))?;

    let value: Value = fastnbt::from_bytes(&nbt_data)?;
    if !matches!(value, Value::Compound(_)) {
        return Err(Error::BinaryFormat("区块根节点不是 Compound".to_string()));
    }
    Ok(value)
}

/// 编码区块，返回带压缩方式前缀的负载
pub fn encode(tree: &Value, scheme: Compression) -> Result<Vec<u8>> {
    let nbt_data = fastnbt::to_bytes(tree)?;

    let mut payload = vec![scheme.id()];
    match scheme {
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(payload, flate2::Compression::default());
            encoder.write_all(&nbt_data)?;
            payload = encoder.finish()?;
        }
        Compression::Zlib => {
            let mut encoder = ZlibEncoder::new(payload, flate2::Compression::default());
            encoder.write_all(&nbt_data)?;
            payload = encoder.finish()?;
        }
    }
    Ok(payload)
}
