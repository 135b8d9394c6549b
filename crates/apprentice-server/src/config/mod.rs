// crates/apprentice-server/src/config/mod.rs
// Home-directory layout and file-based configuration from $APPRENTICE_HOME/config.yaml

use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Filesystem layout under $APPRENTICE_HOME (default `~/.apprentice`).
#[derive(Debug, Clone)]
pub struct ApprenticeHome {
    root: PathBuf,
}

impl ApprenticeHome {
    /// Resolve the home directory: $APPRENTICE_HOME, else `~/.apprentice`.
    pub fn resolve() -> Self {
        let root = std::env::var("APPRENTICE_HOME")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| {
                        warn!("HOME directory not set, using current directory for Apprentice home");
                        PathBuf::from(".")
                    })
                    .join(".apprentice")
            });
        Self { root }
    }

    /// Use an explicit root (tests).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("memory").join("index.db")
    }

    pub fn bash_log_path(&self) -> PathBuf {
        self.root.join("memory").join("logs").join("bash.log")
    }

    pub fn chat_log_path(&self) -> PathBuf {
        self.root.join("memory").join("logs").join("chat.log")
    }

    /// Legacy scripts directory, indexed as an ordinary context.
    pub fn scripts_dir(&self) -> PathBuf {
        self.root.join("memory").join("scripts")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join("indexer.pid")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.root.join("indexer.log")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("config.yaml")
    }

    pub fn env_path(&self) -> PathBuf {
        self.root.join(".env")
    }

    /// Load `.env` into the process environment (ignored when missing).
    pub fn load_env(&self) {
        if let Err(e) = dotenvy::from_path(self.env_path()) {
            debug!("No .env loaded from {}: {}", self.env_path().display(), e);
        }
    }
}

/// Top-level config structure from config.yaml
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprenticeConfig {
    pub indexer: IndexerConfig,
    pub embeddings: EmbeddingsConfig,
    pub chat_import: ChatImportConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexerConfig {
    /// Milliseconds between indexing ticks.
    pub sync_interval: u64,
    /// Files larger than this are never read (bytes).
    pub max_file_size: u64,
    /// Content larger than this is indexed but not stored (bytes).
    pub max_content_store: u64,
    /// Text handed to the embedding provider is truncated to this (bytes).
    pub max_embed_size: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            sync_interval: 60_000,
            max_file_size: 1024 * 1024,
            max_content_store: 100 * 1024,
            max_embed_size: 10 * 1024,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingsConfig {
    pub enabled: bool,
    /// `"provider/model"`, e.g. `"openai/text-embedding-3-small"` or
    /// `"ollama/nomic-embed-text"`.
    pub model: String,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "ollama/nomic-embed-text".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatImportConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub extract_tool_calls: bool,
    pub tool_calls_as_events: bool,
    pub max_message_length: usize,
    pub max_tool_output_length: usize,
}

impl Default for ChatImportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 5 * 60 * 1000,
            extract_tool_calls: false,
            tool_calls_as_events: false,
            max_message_length: 10_000,
            max_tool_output_length: 2_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    /// `fts`, `vector`, or `hybrid`.
    pub default_mode: String,
    pub hybrid_weights: HybridWeights,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_mode: "hybrid".to_string(),
            hybrid_weights: HybridWeights::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase", default)]
pub struct HybridWeights {
    pub fts: f64,
    pub vector: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self { fts: 0.4, vector: 0.6 }
    }
}

#[allow(clippy::expect_used)]
static VAR_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static pattern must compile")
});

/// Expand `${VAR}` tokens in every string value of a YAML tree.
/// Unset variables expand to the empty string.
fn expand_env_vars(value: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match value {
        Value::String(s) => {
            let expanded = VAR_TOKEN.replace_all(&s, |caps: &regex::Captures<'_>| {
                std::env::var(&caps[1]).unwrap_or_default()
            });
            Value::String(expanded.into_owned())
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(expand_env_vars).collect()),
        Value::Mapping(map) => Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, expand_env_vars(v)))
                .collect(),
        ),
        other => other,
    }
}

impl ApprenticeConfig {
    /// Load config from config.yaml, falling back to defaults when the file
    /// is missing or malformed.
    pub fn load(home: &ApprenticeHome) -> Self {
        let path = home.config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::parse(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Failed to parse config file");
                Self::default()
            }),
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a config.yaml body, expanding `${VAR}` tokens in string values.
    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        let raw: serde_yaml::Value = serde_yaml::from_str(contents)?;
        serde_yaml::from_value(expand_env_vars(raw))
    }
}
