//! 标签树路径查找与修改
//!
//! 标签树直接使用 `fastnbt::Value`。查找缺失路径返回 `None` 而不是报错，
//! 由调用方决定是跳过还是强制创建。

use crate::error::{Error, Result};
use fastnbt::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// 路径片段
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Name(String),
    Index(usize),
}

/// 标签路径，文本形式如 `Level.Sections[3].BlockLight`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagPath(Vec<Segment>);

impl TagPath {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 拆成父路径与最后一个片段
    pub fn split_last(&self) -> Option<(&Segment, &[Segment])> {
        self.0.split_last()
    }
}

impl FromStr for TagPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut segments = Vec::new();
        for part in s.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(i) => (&part[..i], &part[i..]),
                None => (part, ""),
            };
            if name.is_empty() && rest.is_empty() {
                return Err(Error::Validation(format!("路径片段为空: {:?}", s)));
            }
            if !name.is_empty() {
                segments.push(Segment::Name(name.to_string()));
            }
            while !rest.is_empty() {
                let end = rest
                    .find(']')
                    .filter(|_| rest.starts_with('['))
                    .ok_or_else(|| Error::Validation(format!("路径索引格式错误: {:?}", s)))?;
                let index = rest[1..end]
                    .trim()
                    .parse()
                    .map_err(|_| Error::Validation(format!("路径索引不是数字: {:?}", s)))?;
                segments.push(Segment::Index(index));
                rest = &rest[end + 1..];
            }
        }
        if segments.is_empty() {
            return Err(Error::Validation("路径为空".to_string()));
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                Segment::Name(n) if i == 0 => write!(f, "{}", n)?,
                Segment::Name(n) => write!(f, ".{}", n)?,
                Segment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// 标签类型名，用于错误信息与列表同构检查
pub fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Byte(_) => "Byte",
        Value::Short(_) => "Short",
        Value::Int(_) => "Int",
        Value::Long(_) => "Long",
        Value::Float(_) => "Float",
        Value::Double(_) => "Double",
        Value::String(_) => "String",
        Value::ByteArray(_) => "ByteArray",
        Value::IntArray(_) => "IntArray",
        Value::LongArray(_) => "LongArray",
        Value::List(_) => "List",
        Value::Compound(_) => "Compound",
    }
}

fn same_kind(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn child<'a>(node: &'a Value, seg: &Segment) -> Option<&'a Value> {
    match (node, seg) {
        (Value::Compound(map), Segment::Name(n)) => map.get(n),
        (Value::List(list), Segment::Index(i)) => list.get(*i),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, seg: &Segment) -> Option<&'a mut Value> {
    match (node, seg) {
        (Value::Compound(map), Segment::Name(n)) => map.get_mut(n),
        (Value::List(list), Segment::Index(i)) => list.get_mut(*i),
        _ => None,
    }
}

/// 按路径查找节点
pub fn get<'a>(root: &'a Value, path: &TagPath) -> Option<&'a Value> {
    get_in(root, path.segments())
}

fn get_in<'a>(root: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |node, seg| child(node, seg))
}

pub fn get_mut<'a>(root: &'a mut Value, path: &TagPath) -> Option<&'a mut Value> {
    get_in_mut(root, path.segments())
}

fn get_in_mut<'a>(root: &'a mut Value, segments: &[Segment]) -> Option<&'a mut Value> {
    segments.iter().try_fold(root, |node, seg| child_mut(node, seg))
}

/// 在 compound 中按名称取字符串
pub fn get_str<'a>(node: &'a Value, name: &str) -> Option<&'a str> {
    match node {
        Value::Compound(map) => match map.get(name) {
            Some(Value::String(s)) => Some(s.as_str()),
            _ => None,
        },
        _ => None,
    }
}

/// 把整数类标签读成 i64
pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Byte(v) => Some(*v as i64),
        Value::Short(v) => Some(*v as i64),
        Value::Int(v) => Some(*v as i64),
        Value::Long(v) => Some(*v),
        _ => None,
    }
}

/// 沿路径取父节点；`force` 时创建缺失的中间节点
fn parent_mut<'a>(
    root: &'a mut Value,
    parents: &[Segment],
    next: &Segment,
    force: bool,
    full: &TagPath,
) -> Result<Option<&'a mut Value>> {
    let mut node = root;
    for (i, seg) in parents.iter().enumerate() {
        let following = parents.get(i + 1).unwrap_or(next);
        let exists = child(node, seg).is_some();
        if !exists {
            if !force {
                return Ok(None);
            }
            let created = match following {
                Segment::Name(_) => Value::Compound(HashMap::new()),
                Segment::Index(_) => Value::List(Vec::new()),
            };
            if !insert_child(node, seg, created, full)? {
                return Ok(None);
            }
        }
        node = match child_mut(node, seg) {
            Some(n) => n,
            None => return Ok(None),
        };
    }
    Ok(Some(node))
}

/// 在父节点中写入子节点；列表只允许覆盖已有元素或在末尾追加
fn insert_child(parent: &mut Value, seg: &Segment, value: Value, full: &TagPath) -> Result<bool> {
    match (parent, seg) {
        (Value::Compound(map), Segment::Name(n)) => {
            map.insert(n.clone(), value);
            Ok(true)
        }
        (Value::List(list), Segment::Index(i)) => {
            if let Some(first) = list.first() {
                if !same_kind(first, &value) {
                    return Err(Error::TagTypeMismatch {
                        path: full.to_string(),
                        expected: kind_name(first),
                        found: kind_name(&value),
                    });
                }
            }
            if *i < list.len() {
                list[*i] = value;
                Ok(true)
            } else if *i == list.len() {
                list.push(value);
                Ok(true)
            } else {
                Ok(false)
            }
        }
        _ => Ok(false),
    }
}

/// 设置路径上的值
///
/// 父路径缺失且未指定 `force` 时返回 `Ok(false)`。
pub fn set(root: &mut Value, path: &TagPath, value: Value, force: bool) -> Result<bool> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(false);
    };
    match parent_mut(root, parents, last, force, path)? {
        Some(parent) => insert_child(parent, last, value, path),
        None => Ok(false),
    }
}

/// 删除路径上的节点，返回被删除的值
pub fn remove(root: &mut Value, path: &TagPath) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    match (get_in_mut(root, parents)?, last) {
        (Value::Compound(map), Segment::Name(n)) => map.remove(n),
        (Value::List(list), Segment::Index(i)) if *i < list.len() => Some(list.remove(*i)),
        _ => None,
    }
}

/// 向路径指向的列表追加元素，保持列表元素类型一致
pub fn append(root: &mut Value, path: &TagPath, value: Value, force: bool) -> Result<bool> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(false);
    };
    let Some(parent) = parent_mut(root, parents, last, force, path)? else {
        return Ok(false);
    };
    if child(parent, last).is_none() {
        if !force {
            return Ok(false);
        }
        if !insert_child(parent, last, Value::List(Vec::new()), path)? {
            return Ok(false);
        }
    }
    match child_mut(parent, last) {
        Some(Value::List(list)) => {
            if let Some(first) = list.first() {
                if !same_kind(first, &value) {
                    return Err(Error::TagTypeMismatch {
                        path: path.to_string(),
                        expected: kind_name(first),
                        found: kind_name(&value),
                    });
                }
            }
            list.push(value);
            Ok(true)
        }
        Some(other) => Err(Error::TagTypeMismatch {
            path: path.to_string(),
            expected: "List",
            found: kind_name(other),
        }),
        None => Ok(false),
    }
}

/// 按条件删除列表元素，返回删除数量
///
/// 先收集所有命中元素的位置，再从最高索引到最低索引一次性删除，
/// 前面的删除不会使后面的索引失效。命中按位置而不是按值判断，
/// 结构相同的两个元素互不影响。
pub fn remove_where<F>(list: &mut Vec<Value>, mut pred: F) -> usize
where
    F: FnMut(&Value) -> bool,
{
    let hits: Vec<usize> = list
        .iter()
        .enumerate()
        .filter(|(_, v)| pred(v))
        .map(|(i, _)| i)
        .collect();
    for &i in hits.iter().rev() {
        list.remove(i);
    }
    hits.len()
}
