//! Prompt construction and response parsing for word enrichment.

use serde_json::Value;

const SYSTEM_TEMPLATE: &str = concat!(
    "你是阿拉伯语词典助手。",
    "请按顺序为每个词提供简洁的中文‘词义和词性’。",
    "若词有常见多义，给最多{n}个义项，用“；”分隔；只有一个义项就只给一个。",
    "每个数组元素必须是字符串，格式为“词性：义项1；义项2”。",
    "只输出 JSON 数组，不要输出任何多余文字。",
    "数组长度必须与输入词数一致。",
);

/// System message asking for at most `senses` senses per word.
pub fn system_prompt(senses: u32) -> String {
    SYSTEM_TEMPLATE.replace("{n}", &senses.max(1).to_string())
}

/// Numbered word list, one word per line.
pub fn user_prompt<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    let lines: Vec<String> = words
        .into_iter()
        .enumerate()
        .map(|(i, w)| format!("{}. {w}", i + 1))
        .collect();
    format!("词列表：\n{}", lines.join("\n"))
}

/// Parse model output as a JSON array.
///
/// Models sometimes wrap the array in prose or code fences; when the whole
/// text does not parse, the slice between the first `[` and the last `]` is
/// tried. Returns `None` when no array can be recovered.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    let text = text.trim();
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => return Some(items),
        Ok(_) => return None,
        Err(_) => {}
    }
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}
