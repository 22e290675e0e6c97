//! Persistence seam for the risk engine

use crate::types::{
    BehaviorSnapshot, BlacklistEntry, BlacklistType, RiskAnalysisResult, RiskItem, RiskLevel,
    RiskScore, Rule, VelocityMetrics,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use uuid::Uuid;

/// Storage used by the aggregator and rule engine
///
/// Implementations must tolerate concurrent reads and appends.
#[async_trait]
pub trait RiskRepository: Send + Sync {
    /// First entry of `entry_type` matching `value` exactly that is active at `now`
    async fn find_active_blacklist(
        &self,
        entry_type: BlacklistType,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BlacklistEntry>>;

    async fn insert_blacklist(&self, entry: BlacklistEntry) -> Result<()>;

    /// Returns whether an entry was removed
    async fn delete_blacklist(&self, id: Uuid) -> Result<bool>;

    async fn behavior_snapshot(&self, actor_id: &str) -> Result<Option<BehaviorSnapshot>>;

    async fn save_behavior_snapshot(&self, snapshot: BehaviorSnapshot) -> Result<()>;

    async fn enabled_rules(&self) -> Result<Vec<Rule>>;

    async fn velocity_metrics(&self, actor_id: &str) -> Result<Option<VelocityMetrics>>;

    /// Append one analysis result. Results are never updated.
    async fn append_result(&self, result: &RiskAnalysisResult) -> Result<()>;
}

/// Stored row of an analysis result, with the item list kept as a JSON array
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedResult {
    pub result_id: Uuid,
    pub actor_id: String,
    pub score: RiskScore,
    pub risk_level: RiskLevel,
    pub risk_items: String,
    pub created_at: DateTime<Utc>,
}

impl PersistedResult {
    pub fn from_result(result: &RiskAnalysisResult) -> Result<Self> {
        Ok(Self {
            result_id: result.result_id,
            actor_id: result.actor_id.clone(),
            score: result.score,
            risk_level: result.risk_level,
            risk_items: result.risk_items_json()?,
            created_at: result.created_at,
        })
    }

    pub fn to_result(&self) -> Result<RiskAnalysisResult> {
        let risk_items: Vec<RiskItem> = serde_json::from_str(&self.risk_items)?;
        Ok(RiskAnalysisResult {
            result_id: self.result_id,
            actor_id: self.actor_id.clone(),
            score: self.score,
            risk_level: self.risk_level,
            risk_items,
            created_at: self.created_at,
        })
    }
}

/// In-process repository
///
/// Reads and appends can be made to fail on demand, which lets callers
/// exercise degraded and fatal paths without a real database.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    blacklist: DashMap<Uuid, BlacklistEntry>,
    snapshots: DashMap<String, BehaviorSnapshot>,
    rules: DashMap<String, Rule>,
    velocity: DashMap<String, VelocityMetrics>,
    results: RwLock<Vec<PersistedResult>>,
    fail_reads: AtomicBool,
    fail_appends: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a rule by id
    pub fn put_rule(&self, rule: Rule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    pub fn put_velocity(&self, actor_id: &str, metrics: VelocityMetrics) {
        self.velocity.insert(actor_id.to_string(), metrics);
    }

    /// All persisted results, oldest first
    pub fn results(&self) -> Result<Vec<RiskAnalysisResult>> {
        self.results.read().iter().map(PersistedResult::to_result).collect()
    }

    /// Raw persisted rows, oldest first
    pub fn persisted(&self) -> Vec<PersistedResult> {
        self.results.read().clone()
    }

    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// Make every read fail with a storage error
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every append fail
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Storage("repository unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RiskRepository for InMemoryRepository {
    async fn find_active_blacklist(
        &self,
        entry_type: BlacklistType,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BlacklistEntry>> {
        self.check_read()?;
        Ok(self
            .blacklist
            .iter()
            .find(|e| e.entry_type == entry_type && e.value == value && e.is_active_at(now))
            .map(|e| e.value().clone()))
    }

    async fn insert_blacklist(&self, entry: BlacklistEntry) -> Result<()> {
        debug!(id = %entry.id, entry_type = %entry.entry_type, "Blacklist entry stored");
        self.blacklist.insert(entry.id, entry);
        Ok(())
    }

    async fn delete_blacklist(&self, id: Uuid) -> Result<bool> {
        Ok(self.blacklist.remove(&id).is_some())
    }

    async fn behavior_snapshot(&self, actor_id: &str) -> Result<Option<BehaviorSnapshot>> {
        self.check_read()?;
        Ok(self.snapshots.get(actor_id).map(|s| s.value().clone()))
    }

    async fn save_behavior_snapshot(&self, snapshot: BehaviorSnapshot) -> Result<()> {
        self.snapshots.insert(snapshot.actor_id.clone(), snapshot);
        Ok(())
    }

    async fn enabled_rules(&self) -> Result<Vec<Rule>> {
        self.check_read()?;
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.value().clone())
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn velocity_metrics(&self, actor_id: &str) -> Result<Option<VelocityMetrics>> {
        self.check_read()?;
        Ok(self.velocity.get(actor_id).map(|v| v.value().clone()))
    }

    async fn append_result(&self, result: &RiskAnalysisResult) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::Storage("results table unavailable".to_string()));
        }
        let row = PersistedResult::from_result(result)?;
        self.results.write().push(row);
        Ok(())
    }
}
