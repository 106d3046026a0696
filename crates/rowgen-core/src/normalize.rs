//! Canonical rendering of heterogeneous service items.
//!
//! The enrichment service is asked for one string per input, but real
//! responses also carry lists of senses or small objects with a part of
//! speech and its meanings. [`MeaningItem`] names those shapes and
//! [`MeaningItem::render`] maps each to a single cell value. The mapping is
//! total: anything unrecognised is kept as its JSON text.

use serde_json::Value;

/// Separator between senses (full-width semicolon).
pub const SENSE_SEPARATOR: &str = "；";
/// Separator between category and meanings (full-width colon).
pub const CATEGORY_SEPARATOR: &str = "：";

const CATEGORY_KEYS: [&str; 3] = ["词性", "pos", "part_of_speech"];
const MEANING_KEYS: [&str; 3] = ["词义", "meaning", "meanings"];

/// A raw item from a service response, classified by shape.
#[derive(Clone, Debug, PartialEq)]
pub enum MeaningItem {
    Plain(String),
    List(Vec<Value>),
    Sense { category: String, meanings: String },
    Other(Value),
}

impl MeaningItem {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Self::Plain(s),
            Value::Array(items) => Self::List(items),
            Value::Object(ref map) => {
                let category = first_truthy(map, &CATEGORY_KEYS).map(scalar_text);
                let meanings = first_truthy(map, &MEANING_KEYS).map(|m| match m {
                    Value::Array(items) => join_senses(items),
                    other => scalar_text(other),
                });
                match (category, meanings) {
                    (Some(category), Some(meanings))
                        if !category.trim().is_empty() && !meanings.trim().is_empty() =>
                    {
                        Self::Sense { category, meanings }
                    }
                    _ => Self::Other(value),
                }
            }
            other => Self::Other(other),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Plain(s) => s.trim().to_string(),
            Self::List(items) => join_senses(items),
            Self::Sense { category, meanings } => {
                format!("{}{CATEGORY_SEPARATOR}{}", category.trim(), meanings.trim())
            }
            Self::Other(value @ (Value::Object(_) | Value::Array(_))) => value.to_string(),
            Self::Other(value) => scalar_text(value).trim().to_string(),
        }
    }
}

/// Normalize one raw item to its canonical cell value.
pub fn normalize_item(value: Value) -> String {
    MeaningItem::from_value(value).render()
}

fn first_truthy<'a>(
    map: &'a serde_json::Map<String, Value>,
    keys: &[&str],
) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find(|v| is_truthy(v))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
    }
}

fn join_senses(items: &[Value]) -> String {
    items
        .iter()
        .map(|item| scalar_text(item).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(SENSE_SEPARATOR)
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_is_trimmed() {
        assert_eq!(normalize_item(json!("  名词：书  ")), "名词：书");
    }

    #[test]
    fn list_is_joined_without_empties() {
        assert_eq!(normalize_item(json!(["书", " ", "本子 ", ""])), "书；本子");
        assert_eq!(normalize_item(json!([])), "");
    }

    #[test]
    fn list_elements_of_other_shapes_are_stringified() {
        assert_eq!(normalize_item(json!(["一", 2])), "一；2");
    }

    #[test]
    fn chinese_keys_render_category_and_meanings() {
        let item = json!({"词性": "名词", "词义": ["书", "书籍"]});
        assert_eq!(normalize_item(item), "名词：书；书籍");
    }

    #[test]
    fn english_keys_render_category_and_meanings() {
        assert_eq!(
            normalize_item(json!({"pos": "verb", "meaning": " to write "})),
            "verb：to write"
        );
        assert_eq!(
            normalize_item(json!({"part_of_speech": "noun", "meanings": ["book"]})),
            "noun：book"
        );
    }

    #[test]
    fn empty_category_falls_through_to_next_key() {
        let item = json!({"词性": "", "pos": "形容词", "meaning": "大的"});
        assert_eq!(normalize_item(item), "形容词：大的");
    }

    #[test]
    fn incomplete_object_is_serialized_verbatim() {
        let item = json!({"pos": "noun"});
        let rendered = normalize_item(item.clone());
        let back: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn object_keeps_non_ascii_unescaped() {
        let rendered = normalize_item(json!({"备注": "无"}));
        assert!(rendered.contains("备注"));
    }

    #[test]
    fn scalars_fall_back_to_text() {
        assert_eq!(normalize_item(json!(42)), "42");
        assert_eq!(normalize_item(json!(true)), "true");
        assert_eq!(normalize_item(Value::Null), "null");
    }

    #[test]
    fn classification_is_explicit() {
        assert_eq!(
            MeaningItem::from_value(json!("x")),
            MeaningItem::Plain("x".into())
        );
        assert!(matches!(
            MeaningItem::from_value(json!({"pos": "n", "meaning": "m"})),
            MeaningItem::Sense { .. }
        ));
        assert!(matches!(
            MeaningItem::from_value(json!({"other": 1})),
            MeaningItem::Other(_)
        ));
    }
}
