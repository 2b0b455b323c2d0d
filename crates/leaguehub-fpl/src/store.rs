//! Persistence for generated crests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CrestStoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrestRecord {
    pub team_name: String,
    pub crest_url: String,
}

impl CrestRecord {
    pub fn new(team_name: impl Into<String>, crest_url: impl Into<String>) -> Self {
        Self {
            team_name: team_name.into(),
            crest_url: crest_url.into(),
        }
    }
}

/// Durable crest storage keyed by team name.
#[async_trait]
pub trait CrestStore: Send + Sync {
    /// Crests stored for any of `team_names`, keyed by team name.
    async fn find_many(&self, team_names: &[String]) -> Result<HashMap<String, String>, CrestStoreError>;

    async fn find(&self, team_name: &str) -> Result<Option<String>, CrestStoreError>;

    /// Insert records whose team name is not stored yet. Returns how
    /// many were inserted.
    async fn save_many(&self, records: &[CrestRecord]) -> Result<usize, CrestStoreError>;

    /// Insert or replace one record.
    async fn upsert(&self, record: CrestRecord) -> Result<(), CrestStoreError>;

    async fn count(&self) -> Result<u64, CrestStoreError>;
}

pub type DynCrestStore = Arc<dyn CrestStore>;

/// Crest store held in process memory.
#[derive(Debug)]
pub struct MemoryCrestStore {
    crests: DashMap<String, String>,
    available: AtomicBool,
}

impl Default for MemoryCrestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCrestStore {
    pub fn new() -> Self {
        Self {
            crests: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Make every call fail, or succeed again.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CrestStoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CrestStoreError::Unavailable("memory store switched off".into()))
        }
    }
}

#[async_trait]
impl CrestStore for MemoryCrestStore {
    async fn find_many(&self, team_names: &[String]) -> Result<HashMap<String, String>, CrestStoreError> {
        self.check()?;
        Ok(team_names
            .iter()
            .filter_map(|name| {
                self.crests
                    .get(name)
                    .map(|url| (name.clone(), url.value().clone()))
            })
            .collect())
    }

    async fn find(&self, team_name: &str) -> Result<Option<String>, CrestStoreError> {
        self.check()?;
        Ok(self.crests.get(team_name).map(|url| url.value().clone()))
    }

    async fn save_many(&self, records: &[CrestRecord]) -> Result<usize, CrestStoreError> {
        self.check()?;
        let mut inserted = 0;
        for record in records {
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.crests.entry(record.team_name.clone()) {
                slot.insert(record.crest_url.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn upsert(&self, record: CrestRecord) -> Result<(), CrestStoreError> {
        self.check()?;
        self.crests.insert(record.team_name, record.crest_url);
        Ok(())
    }

    async fn count(&self) -> Result<u64, CrestStoreError> {
        self.check()?;
        Ok(self.crests.len() as u64)
    }
}
