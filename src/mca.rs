//! MCA 区域文件解析与写入
//!
//! 文件布局：
//! - 0..4096：位置表，1024 项，每项大端 `(扇区偏移 << 8) | 扇区数`
//! - 4096..8192：时间戳表，1024 项大端秒数
//! - 之后：区块数据块，`[长度: 4][压缩方式: 1][数据...]`，按扇区对齐
//!
//! 写入总是先写同目录下的临时文件，再原子重命名覆盖目标文件。

use crate::coords::SLOT_COUNT;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// 扇区大小（字节）
pub const SECTOR_SIZE: usize = 4096;

/// 文件头大小（位置表 + 时间戳表）
pub const HEADER_SIZE: usize = SECTOR_SIZE * 2;

/// 单个区块最多占用的扇区数（位置表中只有 1 字节）
pub const MAX_CHUNK_SECTORS: usize = 255;

/// 所有槽位都为空时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyFilePolicy {
    /// 删除文件
    #[default]
    Remove,
    /// 保留一个只有文件头的合法文件
    KeepHeader,
}

/// 保存结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    Removed,
}

/// 位置表中的一项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotDescriptor {
    pub sector_offset: u32,
    pub sector_count: u8,
    pub timestamp: u32,
}

impl SlotDescriptor {
    pub fn is_present(&self) -> bool {
        self.sector_offset != 0 && self.sector_count != 0
    }
}

/// 写入时使用的槽位内容
#[derive(Debug, Clone, Copy)]
pub struct SlotImage<'a> {
    pub payload: &'a [u8],
    pub timestamp: u32,
}

#[derive(Debug, Clone)]
enum Edit {
    Replace { payload: Vec<u8>, timestamp: u32 },
    Clear,
}

/// 内存中的区域文件：原始文件内容 + 槽位修改
pub struct RegionFile {
    path: PathBuf,
    data: Vec<u8>,
    slots: Vec<SlotDescriptor>,
    edits: HashMap<usize, Edit>,
}

/// 当前 Unix 时间（秒）
pub fn now_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

impl RegionFile {
    /// 读取区域文件并解析文件头
    pub fn open(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(path, data)
    }

    /// 文件不存在时返回空区域
    pub fn open_or_empty(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => Self::from_bytes(path, data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::empty(path)),
            Err(e) => Err(e.into()),
        }
    }

    /// 所有槽位为空的新区域
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            data: Vec::new(),
            slots: vec![SlotDescriptor::default(); SLOT_COUNT],
            edits: HashMap::new(),
        }
    }

    pub fn from_bytes(path: &Path, data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::format(
                path,
                format!("文件长度 {} 小于文件头 {}", data.len(), HEADER_SIZE),
            ));
        }

        let total_sectors = (data.len() + SECTOR_SIZE - 1) / SECTOR_SIZE;
        let mut slots = Vec::with_capacity(SLOT_COUNT);

        for i in 0..SLOT_COUNT {
            let location = be_u32(&data, i * 4);
            let sector_offset = location >> 8;
            let sector_count = (location & 0xff) as u8;
            let timestamp = be_u32(&data, SECTOR_SIZE + i * 4);

            let slot = SlotDescriptor {
                sector_offset,
                sector_count,
                timestamp,
            };
            if slot.is_present() {
                if sector_offset < 2 {
                    return Err(Error::format(path, format!("槽位 {} 指向文件头扇区 {}", i, sector_offset)));
                }
                if sector_offset as usize + sector_count as usize > total_sectors {
                    return Err(Error::format(
                        path,
                        format!(
                            "槽位 {} 超出文件范围: 扇区 {}+{} > {}",
                            i, sector_offset, sector_count, total_sectors
                        ),
                    ));
                }
            }
            slots.push(slot);
        }

        Ok(Self {
            path: path.to_path_buf(),
            data,
            slots,
            edits: HashMap::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 文件头中记录的原始槽位信息
    pub fn descriptor(&self, index: usize) -> SlotDescriptor {
        self.slots[index]
    }

    pub fn is_present(&self, index: usize) -> bool {
        match self.edits.get(&index) {
            Some(Edit::Replace { .. }) => true,
            Some(Edit::Clear) => false,
            None => self.slots[index].is_present(),
        }
    }

    pub fn present_indices(&self) -> Vec<usize> {
        (0..SLOT_COUNT).filter(|&i| self.is_present(i)).collect()
    }

    pub fn is_empty(&self) -> bool {
        (0..SLOT_COUNT).all(|i| !self.is_present(i))
    }

    /// 是否有未保存的修改
    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    pub fn timestamp(&self, index: usize) -> u32 {
        match self.edits.get(&index) {
            Some(Edit::Replace { timestamp, .. }) => *timestamp,
            Some(Edit::Clear) => 0,
            None if self.slots[index].is_present() => self.slots[index].timestamp,
            None => 0,
        }
    }

    /// 读取槽位负载（压缩方式 + 压缩数据），空槽位返回 `None`
    pub fn read_chunk_payload(&self, index: usize) -> Result<Option<&[u8]>> {
        match self.edits.get(&index) {
            Some(Edit::Replace { payload, .. }) => return Ok(Some(payload)),
            Some(Edit::Clear) => return Ok(None),
            None => {}
        }

        let slot = self.slots[index];
        if !slot.is_present() {
            return Ok(None);
        }

        let start = slot.sector_offset as usize * SECTOR_SIZE;
        if start + 4 > self.data.len() {
            return Err(Error::corrupt(&self.path, index, "长度字段超出文件"));
        }
        let length = be_u32(&self.data, start) as usize;
        let body = start + 4;
        if length == 0 {
            return Err(Error::corrupt(&self.path, index, "负载长度为 0"));
        }
        if length > self.data.len() - body {
            return Err(Error::corrupt(
                &self.path,
                index,
                format!("负载长度 {} 超出文件剩余 {}", length, self.data.len() - body),
            ));
        }
        Ok(Some(&self.data[body..body + length]))
    }

    pub fn set_payload(&mut self, index: usize, payload: Vec<u8>) {
        self.set_payload_with_timestamp(index, payload, now_timestamp());
    }

    /// 原样拷贝区块时保留原时间戳
    pub fn set_payload_with_timestamp(&mut self, index: usize, payload: Vec<u8>, timestamp: u32) {
        self.edits.insert(index, Edit::Replace { payload, timestamp });
    }

    pub fn clear(&mut self, index: usize) {
        if self.is_present(index) {
            self.edits.insert(index, Edit::Clear);
        }
    }

    /// 所有槽位的当前内容
    pub fn slot_images(&self) -> Result<Vec<Option<SlotImage<'_>>>> {
        (0..SLOT_COUNT)
            .map(|i| {
                Ok(self.read_chunk_payload(i)?.map(|payload| SlotImage {
                    payload,
                    timestamp: self.timestamp(i),
                }))
            })
            .collect()
    }

    /// 写回自身路径
    pub fn save(&self, policy: EmptyFilePolicy) -> Result<SaveOutcome> {
        self.save_to(&self.path, policy)
    }

    pub fn save_to(&self, path: &Path, policy: EmptyFilePolicy) -> Result<SaveOutcome> {
        let images = self.slot_images()?;
        write_region(path, &images, policy)
    }
}

/// 重新分配扇区并生成完整文件内容
///
/// 区块按槽位顺序从第 2 个扇区开始紧密排列。
pub fn build_image(path: &Path, slots: &[Option<SlotImage<'_>>]) -> Result<Vec<u8>> {
    debug_assert_eq!(slots.len(), SLOT_COUNT);

    let body_size: usize = slots
        .iter()
        .flatten()
        .map(|s| sectors_for(s.payload.len()) * SECTOR_SIZE)
        .sum();
    let mut image = vec![0u8; HEADER_SIZE];
    image.reserve(body_size);
    let mut current_sector = 2usize;

    for (index, slot) in slots.iter().enumerate() {
        let Some(slot) = slot else { continue };

        let sector_count = sectors_for(slot.payload.len());
        if sector_count > MAX_CHUNK_SECTORS {
            return Err(Error::corrupt(
                path,
                index,
                format!("区块占用 {} 个扇区，超过上限 {}", sector_count, MAX_CHUNK_SECTORS),
            ));
        }

        let location = ((current_sector as u32) << 8) | sector_count as u32;
        image[index * 4..index * 4 + 4].copy_from_slice(&location.to_be_bytes());
        image[SECTOR_SIZE + index * 4..SECTOR_SIZE + index * 4 + 4]
            .copy_from_slice(&slot.timestamp.to_be_bytes());

        let block_start = image.len();
        image.extend_from_slice(&(slot.payload.len() as u32).to_be_bytes());
        image.extend_from_slice(slot.payload);
        image.resize(block_start + sector_count * SECTOR_SIZE, 0);

        current_sector += sector_count;
    }

    Ok(image)
}

fn sectors_for(payload_len: usize) -> usize {
    (payload_len + 4 + SECTOR_SIZE - 1) / SECTOR_SIZE
}

/// 写入全部 1024 个槽位
pub fn write_region(path: &Path, slots: &[Option<SlotImage<'_>>], policy: EmptyFilePolicy) -> Result<SaveOutcome> {
    if slots.iter().all(Option::is_none) && policy == EmptyFilePolicy::Remove {
        match fs::remove_file(path) {
            Ok(()) => log::debug!("删除空区域文件 {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(SaveOutcome::Removed);
    }

    let image = build_image(path, slots)?;
    commit_atomic(path, &image, |_| Ok(()))?;
    Ok(SaveOutcome::Written)
}

/// 原子写入：同目录临时文件写完并同步后重命名覆盖目标
///
/// `before_commit` 在临时文件写完、重命名之前调用，返回错误时目标文件保持不变。
/// 临时文件在任何退出路径上都会被删除。
pub fn commit_atomic<F>(path: &Path, bytes: &[u8], before_commit: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".mcabatch-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;

    before_commit(tmp.path())?;

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
