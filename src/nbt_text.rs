//! 带类型标记的文本 → NBT 值
//!
//! 字段修改指令的值使用这种写法：
//! - `5b` / `3s` / `12L` / `1.5f`：Byte / Short / Long / Float
//! - `B;<base64>` / `I;<base64>` / `L;<base64>`：数组（大端字节）
//! - JSON 数字：整数为 Int（超出范围为 Long），小数为 Double
//! - JSON 数组 / 对象：List / Compound，元素递归解析
//! - 其他：字符串。以 `\0` 结尾的字符串强制按普通字符串处理

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use fastnbt::{ByteArray, IntArray, LongArray, Value};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// 解析一段值文本
pub fn parse_value(text: &str) -> Result<Value> {
    let text = text.trim();
    match serde_json::from_str::<JsonValue>(text) {
        Ok(json) => json_to_nbt(&json),
        // 不是合法 JSON（例如 `12L`），按带类型字符串解析
        Err(_) => parse_string_value(text),
    }
}

/// 将 JSON 转换为 NBT 值
pub fn json_to_nbt(json: &JsonValue) -> Result<Value> {
    match json {
        JsonValue::Object(obj) => {
            let mut map = HashMap::new();
            for (k, v) in obj {
                map.insert(k.clone(), json_to_nbt(v)?);
            }
            Ok(Value::Compound(map))
        }
        JsonValue::Array(arr) => {
            let list = arr.iter().map(json_to_nbt).collect::<Result<Vec<_>>>()?;
            if let Some(first) = list.first() {
                let kind = std::mem::discriminant(first);
                if list.iter().any(|v| std::mem::discriminant(v) != kind) {
                    return Err(Error::Validation("列表元素类型不一致".to_string()));
                }
            }
            Ok(Value::List(list))
        }
        JsonValue::String(s) => parse_string_value(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    Ok(Value::Int(i as i32))
                } else {
                    Ok(Value::Long(i))
                }
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Double(f))
            } else {
                Err(Error::Validation(format!("无法表示的数字: {}", n)))
            }
        }
        JsonValue::Bool(b) => Ok(Value::Byte(if *b { 1 } else { 0 })),
        JsonValue::Null => Err(Error::Validation("不支持 null 值".to_string())),
    }
}

/// 解析字符串值（可能包含类型标记）
fn parse_string_value(s: &str) -> Result<Value> {
    if let Some(plain) = s.strip_suffix("\\0") {
        return Ok(Value::String(plain.to_string()));
    }

    // 数组类型（B;, I;, L; 都是 ASCII 前缀）
    if s.len() > 2 && s.as_bytes().get(1) == Some(&b';') {
        let prefix = s.as_bytes()[0];
        if matches!(prefix, b'B' | b'I' | b'L') {
            let bytes = BASE64
                .decode(&s[2..])
                .map_err(|e| Error::Validation(format!("数组 base64 无效: {}", e)))?;
            return match prefix {
                b'B' => Ok(Value::ByteArray(ByteArray::new(
                    bytes.iter().map(|&b| b as i8).collect(),
                ))),
                b'I' => {
                    if bytes.len() % 4 != 0 {
                        return Err(Error::Validation("IntArray 字节数不是 4 的倍数".to_string()));
                    }
                    Ok(Value::IntArray(IntArray::new(
                        bytes
                            .chunks_exact(4)
                            .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                            .collect(),
                    )))
                }
                _ => {
                    if bytes.len() % 8 != 0 {
                        return Err(Error::Validation("LongArray 字节数不是 8 的倍数".to_string()));
                    }
                    Ok(Value::LongArray(LongArray::new(
                        bytes
                            .chunks_exact(8)
                            .map(|c| i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                            .collect(),
                    )))
                }
            };
        }
    }

    // 数值类型后缀（b, s, L, f 都是 1 字节 ASCII）
    if let Some(last) = s.chars().last() {
        let prefix = &s[..s.len() - last.len_utf8()];
        let parsed = match last {
            'b' => prefix.parse::<i8>().ok().map(Value::Byte),
            's' => prefix.parse::<i16>().ok().map(Value::Short),
            'L' => prefix.parse::<i64>().ok().map(Value::Long),
            'f' => prefix.parse::<f32>().ok().map(Value::Float),
            'd' => prefix.parse::<f64>().ok().map(Value::Double),
            _ => None,
        };
        if let Some(v) = parsed {
            return Ok(v);
        }
    }

    Ok(Value::String(s.to_string()))
}
