//! Per-guild records
//!
//! Makes sure a guild has an entry in the guilds table before anything reads it.

use crate::database::{DatabaseError, Table, TableStore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serenity::all::GuildId;
use std::sync::Arc;
use tracing::info;

/// A guild's entry in the guilds table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildRecord {
    /// Moderation cases keyed by case number
    #[serde(default)]
    pub cases: Map<String, Value>,
    #[serde(default)]
    pub case_num: u64,
    #[serde(default)]
    pub banned_words: Vec<String>,
}

pub struct GuildRegistrar {
    store: Arc<TableStore>,
    default_prefix: String,
}

impl GuildRegistrar {
    pub fn new(store: Arc<TableStore>, default_prefix: impl Into<String>) -> Self {
        Self {
            store,
            default_prefix: default_prefix.into(),
        }
    }

    /// Create the guild's record if it has none
    ///
    /// Returns `true` when a record was created; the table is flushed only then.
    pub async fn ensure(&self, guild_id: GuildId) -> Result<bool, DatabaseError> {
        let key = guild_id.to_string();
        let mut guilds = self.store.open(Table::Guilds).await?;

        if guilds.contains_key(&key) {
            return Ok(false);
        }

        let record = serde_json::to_value(GuildRecord::default()).map_err(|source| {
            DatabaseError::Json {
                table: Table::Guilds,
                source,
            }
        })?;
        guilds.insert(key, record);
        guilds.flush().await?;

        info!("Registered guild {}", guild_id);
        Ok(true)
    }

    /// Read a guild's record, if it has one
    pub async fn record(&self, guild_id: GuildId) -> Result<Option<GuildRecord>, DatabaseError> {
        let guilds = self.store.open(Table::Guilds).await?;

        guilds
            .get(&guild_id.to_string())
            .map(|value| {
                GuildRecord::deserialize(value).map_err(|source| DatabaseError::Json {
                    table: Table::Guilds,
                    source,
                })
            })
            .transpose()
    }

    pub async fn banned_words(&self, guild_id: GuildId) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .record(guild_id)
            .await?
            .map(|record| record.banned_words)
            .unwrap_or_default())
    }

    /// The guild's command prefix, or the configured default
    ///
    /// Entries in the prefixes table look like `{"prefix": "?"}`.
    pub async fn prefix(&self, guild_id: GuildId) -> Result<String, DatabaseError> {
        let prefixes = self.store.open(Table::Prefixes).await?;

        Ok(prefixes
            .get(&guild_id.to_string())
            .and_then(|entry| entry.get("prefix"))
            .and_then(Value::as_str)
            .unwrap_or(self.default_prefix.as_str())
            .to_string())
    }
}
