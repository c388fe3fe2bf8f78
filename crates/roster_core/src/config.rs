//! Store configuration.
//!
//! Defaults are usable as-is; [`StoreConfig::from_env`] overrides them from
//! `ROSTER_*` environment variables.

use crate::model::EntityKind;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// How updates of one entity type detect concurrent modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Unconditional update; the last committed write wins.
    #[default]
    LastWriterWins,
    /// Update only if the stored version still equals the one observed.
    Optimistic,
}

/// What deleting a team does to members that still reference it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamDeletePolicy {
    #[default]
    Restrict,
    DetachMembers,
}

/// Identity-map handling after a bulk update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkCachePolicy {
    /// Cached copies stay as they were; callers reload or clear explicitly.
    #[default]
    Retain,
    EvictAffected,
    ClearAll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Upper bound for pessimistic lock waits and SQLite's busy handler.
    pub lock_timeout_ms: u64,
    pub member_concurrency: ConcurrencyMode,
    pub team_concurrency: ConcurrencyMode,
    pub team_delete_policy: TeamDeletePolicy,
    pub bulk_cache_policy: BulkCachePolicy,
    /// Use WAL journaling for file databases.
    pub journal_wal: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            member_concurrency: ConcurrencyMode::default(),
            team_concurrency: ConcurrencyMode::default(),
            team_delete_policy: TeamDeletePolicy::default(),
            bulk_cache_policy: BulkCachePolicy::default(),
            journal_wal: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{key} has invalid value `{value}`")]
    InvalidValue { key: &'static str, value: String },
}

impl StoreConfig {
    /// Reads overrides from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`StoreConfig::from_env`] with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup("ROSTER_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = parse_var("ROSTER_LOCK_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("ROSTER_MEMBER_CONCURRENCY") {
            config.member_concurrency = parse_var("ROSTER_MEMBER_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("ROSTER_TEAM_CONCURRENCY") {
            config.team_concurrency = parse_var("ROSTER_TEAM_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("ROSTER_TEAM_DELETE_POLICY") {
            config.team_delete_policy = parse_var("ROSTER_TEAM_DELETE_POLICY", &value)?;
        }
        if let Some(value) = lookup("ROSTER_BULK_CACHE_POLICY") {
            config.bulk_cache_policy = parse_var("ROSTER_BULK_CACHE_POLICY", &value)?;
        }
        if let Some(value) = lookup("ROSTER_JOURNAL_WAL") {
            config.journal_wal = parse_var("ROSTER_JOURNAL_WAL", &value)?;
        }
        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn concurrency_for(&self, kind: EntityKind) -> ConcurrencyMode {
        match kind {
            EntityKind::Member => self.member_concurrency,
            EntityKind::Team => self.team_concurrency,
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

impl FromStr for ConcurrencyMode {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, ()> {
        match value {
            "last_writer_wins" => Ok(Self::LastWriterWins),
            "optimistic" => Ok(Self::Optimistic),
            _ => Err(()),
        }
    }
}

impl FromStr for TeamDeletePolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, ()> {
        match value {
            "restrict" => Ok(Self::Restrict),
            "detach_members" => Ok(Self::DetachMembers),
            _ => Err(()),
        }
    }
}

impl FromStr for BulkCachePolicy {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, ()> {
        match value {
            "retain" => Ok(Self::Retain),
            "evict_affected" => Ok(Self::EvictAffected),
            "clear_all" => Ok(Self::ClearAll),
            _ => Err(()),
        }
    }
}
