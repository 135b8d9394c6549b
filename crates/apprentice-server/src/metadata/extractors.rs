// crates/apprentice-server/src/metadata/extractors.rs
// Per-extension metadata extractors, run in descending priority
//
// Each extractor's output lands under its name as a namespace. A failing
// handler is logged and skipped; extraction never aborts the file.

use serde_json::{Map, Value, json};
use std::path::Path;

/// One registered extractor.
pub struct Extractor {
    pub name: &'static str,
    pub extensions: &'static [&'static str],
    pub priority: i32,
    pub extract: fn(&Path, &str) -> anyhow::Result<Value>,
}

/// Registry of extractors, highest priority first per extension.
pub struct ExtractorRegistry {
    extractors: Vec<Extractor>,
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ExtractorRegistry {
    pub fn with_builtins() -> Self {
        let mut registry = Self { extractors: Vec::new() };
        registry.register(Extractor {
            name: "script",
            extensions: &["sh", "bash", "zsh"],
            priority: 10,
            extract: extract_shell_script,
        });
        registry.register(Extractor {
            name: "frontmatter",
            extensions: &["md", "mdx"],
            priority: 10,
            extract: extract_frontmatter,
        });
        registry
    }

    pub fn register(&mut self, extractor: Extractor) {
        self.extractors.push(extractor);
        self.extractors.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Run every extractor matching the extension, namespacing results by
    /// extractor name.
    pub fn extract(&self, path: &Path, extension: &str, content: &str) -> Value {
        let mut out = Map::new();
        for extractor in self
            .extractors
            .iter()
            .filter(|e| e.extensions.contains(&extension))
        {
            match (extractor.extract)(path, content) {
                Ok(Value::Object(map)) if map.is_empty() => {}
                Ok(value) => {
                    out.insert(extractor.name.to_string(), value);
                }
                Err(e) => {
                    tracing::warn!(
                        extractor = extractor.name,
                        path = %path.display(),
                        "Metadata extraction failed: {}",
                        e
                    );
                }
            }
        }
        Value::Object(out)
    }
}

/// Shell-script extractor: shebang plus a `key: value` header comment block.
///
/// Recognised keys are description, usage and args (case-insensitive);
/// continuation lines are collected until the first blank or non-comment
/// line ends the block.
fn extract_shell_script(_path: &Path, content: &str) -> anyhow::Result<Value> {
    let mut out = Map::new();
    let mut lines = content.lines().peekable();

    if let Some(first) = lines.peek() {
        if let Some(shebang) = first.strip_prefix("#!") {
            out.insert("shebang".to_string(), json!(shebang.trim()));
            lines.next();
        }
    }

    let mut current_key: Option<String> = None;
    let mut fields: Map<String, Value> = Map::new();
    for line in lines {
        let Some(comment) = line.trim_start().strip_prefix('#') else {
            break;
        };
        let comment = comment.trim();
        if comment.is_empty() {
            break;
        }

        let lowered = comment.to_ascii_lowercase();
        let matched = ["description:", "usage:", "args:"]
            .iter()
            .find(|prefix| lowered.starts_with(*prefix));
        if let Some(prefix) = matched {
            let key = prefix.trim_end_matches(':').to_string();
            let value = comment[prefix.len()..].trim().to_string();
            fields.insert(key.clone(), json!(value));
            current_key = Some(key);
        } else if let Some(ref key) = current_key {
            // continuation line for the previous field
            if let Some(Value::String(existing)) = fields.get_mut(key) {
                if existing.is_empty() {
                    *existing = comment.to_string();
                } else {
                    existing.push(' ');
                    existing.push_str(comment);
                }
            }
        }
    }

    out.extend(fields);
    Ok(Value::Object(out))
}

/// Frontmatter extractor: a YAML block delimited by `---` on the first
/// line and the next `---` line. Returns `{}` on parse failure.
fn extract_frontmatter(_path: &Path, content: &str) -> anyhow::Result<Value> {
    let mut lines = content.lines();
    if lines.next().map(str::trim) != Some("---") {
        return Ok(Value::Object(Map::new()));
    }

    let mut block = String::new();
    let mut closed = false;
    for line in lines {
        if line.trim() == "---" {
            closed = true;
            break;
        }
        block.push_str(line);
        block.push('\n');
    }
    if !closed {
        return Ok(Value::Object(Map::new()));
    }

    match serde_yaml::from_str::<serde_json::Value>(&block) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) | Err(_) => Ok(Value::Object(Map::new())),
    }
}
