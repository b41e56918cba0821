//! Configuration management for Berserker
//!
//! Reads a JSON configuration document once, keeps it as a `ConfigNode` tree,
//! and projects it into the typed `Config` the rest of the bot uses.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Document path used when `BERSERKER_CONFIG` is not set
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Seconds a room survives after its author leaves
pub const DEFAULT_ROOM_DELETION_TIMEOUT: u64 = 5 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed configuration document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Unknown extension: {0}")]
    UnknownExtension(String),
}

/// A node of the loaded configuration document
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigNode {
    Scalar(Value),
    Sequence(Vec<ConfigNode>),
    Fields(HashMap<String, ConfigNode>),
}

impl From<Value> for ConfigNode {
    fn from(value: Value) -> Self {
        match value {
            Value::Array(items) => {
                ConfigNode::Sequence(items.into_iter().map(ConfigNode::from).collect())
            }
            Value::Object(fields) => ConfigNode::Fields(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, ConfigNode::from(value)))
                    .collect(),
            ),
            scalar => ConfigNode::Scalar(scalar),
        }
    }
}

impl ConfigNode {
    /// Look up a named field; `None` for missing fields and non-mapping nodes
    pub fn field(&self, name: &str) -> Option<&ConfigNode> {
        match self {
            ConfigNode::Fields(fields) => fields.get(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigNode::Scalar(Value::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            ConfigNode::Scalar(value) => value.as_u64(),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[ConfigNode]> {
        match self {
            ConfigNode::Sequence(items) => Some(items),
            _ => None,
        }
    }

    fn require(&self, name: &str) -> Result<&ConfigNode, ConfigError> {
        self.field(name)
            .ok_or_else(|| ConfigError::MissingField(name.to_string()))
    }

    fn require_str(&self, name: &str) -> Result<&str, ConfigError> {
        let node = self.require(name)?;
        node.as_str()
            .ok_or_else(|| ConfigError::InvalidValue(name.to_string(), format!("{:?}", node)))
    }
}

/// Lazily loaded, cached configuration document
///
/// The file is read on the first `load` only; later calls return the cached tree.
pub struct ConfigStore {
    path: PathBuf,
    cached: Mutex<Option<Arc<ConfigNode>>>,
}

impl ConfigStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cached: Mutex::new(None),
        }
    }

    /// Store for the document named by `BERSERKER_CONFIG`
    pub fn from_env() -> Self {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let path =
            env::var("BERSERKER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document tree, reading the file only on first access
    pub fn load(&self) -> Result<Arc<ConfigNode>, ConfigError> {
        let mut cached = self.cached.lock();
        if let Some(node) = cached.as_ref() {
            return Ok(node.clone());
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&raw)?;
        let node = Arc::new(ConfigNode::from(value));

        *cached = Some(node.clone());
        Ok(node)
    }
}

/// Optional features toggled by the `extensions` list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    /// Temporary voice rooms
    Rooms,
    /// Banned-word message filter
    Filter,
}

impl Extension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Extension::Rooms => "rooms",
            Extension::Filter => "filter",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rooms" => Some(Extension::Rooms),
            "filter" => Some(Extension::Filter),
            _ => None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Discord bot token
    pub token: String,
    /// Enabled extensions, in document order
    pub extensions: Vec<Extension>,
    /// Prefix used by guilds without an entry in the prefixes table
    pub default_prefix: String,
    pub prefix_table_path: PathBuf,
    pub guild_table_path: PathBuf,
    pub user_table_path: PathBuf,
    /// How long a room waits for its author before the channel is deleted
    pub room_deletion_timeout: Duration,
}

impl Config {
    /// Load typed settings from a store, applying environment overrides
    pub fn load(store: &ConfigStore) -> Result<Self, ConfigError> {
        let node = store.load()?;
        let mut config = Self::from_node(&node)?;

        if let Some(token) = env::var("DISCORD_TOKEN").ok().filter(|s| !s.is_empty()) {
            config.token = token;
        }

        Ok(config)
    }

    /// Project a loaded document tree into typed settings
    pub fn from_node(root: &ConfigNode) -> Result<Self, ConfigError> {
        let token = root.require_str("token")?.to_string();

        let extensions = root
            .require("extensions")?
            .as_sequence()
            .ok_or_else(|| {
                ConfigError::InvalidValue("extensions".to_string(), "expected a list".to_string())
            })?
            .iter()
            .map(|node| {
                let name = node.as_str().ok_or_else(|| {
                    ConfigError::InvalidValue("extensions".to_string(), format!("{:?}", node))
                })?;
                Extension::from_str(name)
                    .ok_or_else(|| ConfigError::UnknownExtension(name.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let room_deletion_timeout = match root.field("ROOM_DELETION_TIMEOUT") {
            Some(node) => node.as_u64().ok_or_else(|| {
                ConfigError::InvalidValue("ROOM_DELETION_TIMEOUT".to_string(), format!("{:?}", node))
            })?,
            None => DEFAULT_ROOM_DELETION_TIMEOUT,
        };

        Ok(Self {
            token,
            extensions,
            default_prefix: root.require_str("DEFAULT_PREFIX")?.to_string(),
            prefix_table_path: root.require_str("PREFIX_TABLE_PATH")?.into(),
            guild_table_path: root.require_str("GUILD_TABLE_PATH")?.into(),
            user_table_path: root.require_str("USER_TABLE_PATH")?.into(),
            room_deletion_timeout: Duration::from_secs(room_deletion_timeout),
        })
    }

    pub fn is_enabled(&self, extension: Extension) -> bool {
        self.extensions.contains(&extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "token": "abc",
            "extensions": ["rooms", "filter"],
            "DEFAULT_PREFIX": "!",
            "PREFIX_TABLE_PATH": "data/prefixes.json",
            "GUILD_TABLE_PATH": "data/guilds.json",
            "USER_TABLE_PATH": "data/users.json"
        })
    }

    #[test]
    fn test_node_mirrors_document() {
        let node = ConfigNode::from(json!({"a": [1, {"b": "c"}], "d": true}));

        let items = node.field("a").and_then(|n| n.as_sequence()).unwrap();
        assert_eq!(items[0].as_u64(), Some(1));
        assert_eq!(items[1].field("b").and_then(|n| n.as_str()), Some("c"));
        assert_eq!(node.field("d"), Some(&ConfigNode::Scalar(json!(true))));
        assert!(node.field("missing").is_none());
    }

    #[test]
    fn test_config_from_node() {
        let config = Config::from_node(&ConfigNode::from(document())).unwrap();

        assert_eq!(config.token, "abc");
        assert_eq!(config.extensions, vec![Extension::Rooms, Extension::Filter]);
        assert_eq!(config.default_prefix, "!");
        assert_eq!(config.guild_table_path, PathBuf::from("data/guilds.json"));
        assert_eq!(config.room_deletion_timeout, Duration::from_secs(300));
        assert!(config.is_enabled(Extension::Filter));
    }

    #[test]
    fn test_config_rejects_bad_documents() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("token");
        assert!(matches!(
            Config::from_node(&ConfigNode::from(doc)),
            Err(ConfigError::MissingField(f)) if f == "token"
        ));

        let mut doc = document();
        doc["extensions"] = json!(["rooms", "music"]);
        assert!(matches!(
            Config::from_node(&ConfigNode::from(doc)),
            Err(ConfigError::UnknownExtension(e)) if e == "music"
        ));

        let mut doc = document();
        doc["ROOM_DELETION_TIMEOUT"] = json!("soon");
        assert!(matches!(
            Config::from_node(&ConfigNode::from(doc)),
            Err(ConfigError::InvalidValue(..))
        ));
    }

    #[test]
    fn test_store_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, document().to_string()).unwrap();

        let store = ConfigStore::new(&path);
        let first = store.load().unwrap();

        std::fs::write(&path, "{\"token\": \"changed\"}").unwrap();
        let second = store.load().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.field("token").and_then(|n| n.as_str()), Some("abc"));
    }

    #[test]
    fn test_config_load_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut doc = document();
        doc["ROOM_DELETION_TIMEOUT"] = json!(60);
        std::fs::write(&path, doc.to_string()).unwrap();

        let store = ConfigStore::new(&path);
        let config = Config::load(&store).unwrap();

        assert_eq!(config.extensions, vec![Extension::Rooms, Extension::Filter]);
        assert_eq!(config.default_prefix, "!");
        assert_eq!(config.user_table_path, PathBuf::from("data/users.json"));
        assert_eq!(config.room_deletion_timeout, Duration::from_secs(60));
        assert!(!config.token.is_empty());

        let missing = ConfigStore::new(dir.path().join("absent.json"));
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_store_load_errors() {
        let dir = tempfile::tempdir().unwrap();

        let missing = ConfigStore::new(dir.path().join("absent.json"));
        assert!(matches!(missing.load(), Err(ConfigError::Io { .. })));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "token = \"abc\"").unwrap();
        assert!(matches!(
            ConfigStore::new(&path).load(),
            Err(ConfigError::Parse(_))
        ));
    }
}
