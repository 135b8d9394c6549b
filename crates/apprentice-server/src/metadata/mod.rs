// crates/apprentice-server/src/metadata/mod.rs
// Schemaless metadata helpers: dot-path lookup, flatten/expand, namespaced merge
//
// Metadata is a serde_json::Value tree whose top-level keys are namespaces
// (script, frontmatter, filesystem, shell, chat, ...). Nothing here
// pre-declares a namespace.

pub mod extractors;

use serde_json::{Map, Value};

/// Look up a dot-separated path in a metadata tree.
/// Only object keys are traversed; an empty path returns the root.
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Flatten a metadata tree into dot-path → leaf pairs.
/// Arrays and other non-object values are leaves.
pub fn flatten_metadata(value: &Value) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, prefix: String, out: &mut Map<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (k, v) in map {
                let path = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten_into(v, path, out);
            }
        }
        other => {
            if !prefix.is_empty() {
                out.insert(prefix, other.clone());
            }
        }
    }
}

/// Expand dot-path → leaf pairs back into a nested object tree.
pub fn expand_metadata(flat: &Map<String, Value>) -> Value {
    let mut root = Map::new();
    for (path, leaf) in flat {
        let mut cursor = &mut root;
        let segments: Vec<&str> = path.split('.').collect();
        for (i, segment) in segments.iter().enumerate() {
            if i + 1 == segments.len() {
                cursor.insert((*segment).to_string(), leaf.clone());
            } else {
                let entry = cursor
                    .entry((*segment).to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                // a shorter path may have claimed this segment as a leaf
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                match entry.as_object_mut() {
                    Some(map) => cursor = map,
                    None => break,
                }
            }
        }
    }
    Value::Object(root)
}

/// Merge `incoming` namespaces into `base`, replacing whole namespaces.
/// Non-object metadata in either operand is treated as empty.
pub fn merge_namespaces(base: &Value, incoming: &Value) -> Value {
    let mut merged = base.as_object().cloned().unwrap_or_default();
    if let Some(incoming) = incoming.as_object() {
        for (namespace, value) in incoming {
            merged.insert(namespace.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path() {
        let meta = json!({"chat": {"session_id": "S"}, "shell": {"exit": 0}});
        assert_eq!(get_path(&meta, "chat.session_id"), Some(&json!("S")));
        assert_eq!(get_path(&meta, "shell.exit"), Some(&json!(0)));
        assert_eq!(get_path(&meta, "chat.missing"), None);
        assert_eq!(get_path(&meta, "missing.path"), None);
        assert_eq!(get_path(&meta, ""), Some(&meta));
    }

    #[test]
    fn test_flatten_then_expand_is_identity_without_arrays() {
        let meta = json!({
            "script": {"description": "x", "nested": {"deep": true}},
            "frontmatter": {"title": "T"}
        });
        let flat = flatten_metadata(&meta);
        assert_eq!(flat.get("script.nested.deep"), Some(&json!(true)));
        assert_eq!(expand_metadata(&flat), meta);
    }

    #[test]
    fn test_expand_then_flatten_is_identity_on_primitive_leaves() {
        let mut flat = Map::new();
        flat.insert("a.b".to_string(), json!(1));
        flat.insert("a.c".to_string(), json!("x"));
        flat.insert("d".to_string(), json!(null));
        let expanded = expand_metadata(&flat);
        assert_eq!(flatten_metadata(&expanded), flat);
    }

    #[test]
    fn test_flatten_keeps_arrays_as_leaves() {
        let meta = json!({"relations": [{"asset_id": "a"}]});
        let flat = flatten_metadata(&meta);
        assert_eq!(flat.get("relations"), Some(&json!([{"asset_id": "a"}])));
    }

    #[test]
    fn test_merge_namespaces_replaces_whole_namespace() {
        let base = json!({"script": {"description": "old", "usage": "u"}, "filesystem": {"size": 1}});
        let incoming = json!({"script": {"description": "new"}});
        let merged = merge_namespaces(&base, &incoming);
        assert_eq!(merged["script"], json!({"description": "new"}));
        assert_eq!(merged["filesystem"], json!({"size": 1}));
    }
}
