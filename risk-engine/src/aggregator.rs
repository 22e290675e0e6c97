//! Risk aggregation pipeline
//!
//! ```text
//!  RiskContext
//!      │
//!      ▼
//!  validate ──▶ blacklist (actor, ip) ──hit──▶ 100 / Critical ─┐
//!      │                                                      │
//!      ▼                                                      │
//!  collect signals (each may be omitted on failure)           │
//!    amount · location · bot · rules+velocity · remote        │
//!      │                                                      │
//!      ▼                                                      │
//!  weighted fusion ──▶ classify ──▶ append result ◀───────────┘
//! ```
//!
//! Only invalid input, a failed final write or an expired caller deadline
//! abort an evaluation. Every other failure drops the affected signal.

use crate::antibot::{AntiBotDetector, BehaviorSample};
use crate::config::Config;
use crate::fraud_ring::{FraudRingDetector, RelationshipEdge};
use crate::frequency::{Decay, DecayHandle, DecayScheduler, FrequencyEstimator};
use crate::metrics::RiskMetrics;
use crate::remote::{HttpRemoteRiskClient, RemoteRiskClient, RemoteRiskRequest};
use crate::repository::RiskRepository;
use crate::rules::{build_facts, RuleEngine, RuleLoadReport};
use crate::scoring::{RiskScorer, SignalSet};
use crate::types::{
    BehaviorSnapshot, BlacklistEntry, BlacklistType, FraudRing, RiskAnalysisResult, RiskContext,
    RiskItem, RiskItemType, RiskScore, VelocityMetrics,
};
use crate::{Error, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Action name recorded for bot heuristics on every evaluation
const EVALUATION_ACTION: &str = "transaction";

/// Risk aggregator
pub struct RiskAggregator {
    config: Config,
    repository: Arc<dyn RiskRepository>,
    estimator: Arc<FrequencyEstimator>,
    antibot: Arc<AntiBotDetector>,
    rules: RuleEngine,
    scorer: RiskScorer,
    remote: Option<Arc<dyn RemoteRiskClient>>,
    metrics: RiskMetrics,
}

impl RiskAggregator {
    /// Create an aggregator over `repository` with no rules loaded
    ///
    /// An HTTP remote client is attached when `config.remote.enabled` is set.
    /// Nothing is spawned: request counts only decay once [`Self::spawn_decay`]
    /// is called, and rules only appear after [`Self::reload_rules`].
    pub fn new(config: Config, repository: Arc<dyn RiskRepository>) -> Result<Self> {
        config.validate()?;

        let estimator = Arc::new(FrequencyEstimator::from_config(&config.estimator)?);
        let antibot = Arc::new(AntiBotDetector::new(config.antibot.clone(), estimator.clone()));
        let scorer = RiskScorer::new(config.scoring.clone());
        let metrics = RiskMetrics::for_service(&config.service_name)
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        let remote: Option<Arc<dyn RemoteRiskClient>> = if config.remote.enabled {
            Some(Arc::new(HttpRemoteRiskClient::new(&config.remote)?))
        } else {
            None
        };

        info!(
            service = %config.service_name,
            remote = remote.is_some(),
            sketch_depth = config.estimator.depth,
            sketch_width = config.estimator.width,
            "Risk aggregator created"
        );

        Ok(Self {
            config,
            repository,
            estimator,
            antibot,
            rules: RuleEngine::new(),
            scorer,
            remote,
            metrics,
        })
    }

    /// Attach a remote risk collaborator, replacing any configured one
    pub fn with_remote(mut self, client: Arc<dyn RemoteRiskClient>) -> Self {
        self.remote = Some(client);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &RiskMetrics {
        &self.metrics
    }

    pub fn antibot(&self) -> &AntiBotDetector {
        &self.antibot
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn estimator(&self) -> &Arc<FrequencyEstimator> {
        &self.estimator
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Start the background decay on the configured interval
    ///
    /// Each tick decays the request-rate estimator and prunes idle cadence
    /// history. Must be called from within a tokio runtime; the returned
    /// handle stops the task.
    pub fn spawn_decay(&self) -> DecayHandle {
        let targets = vec![
            self.estimator.clone() as Arc<dyn Decay>,
            self.antibot.clone() as Arc<dyn Decay>,
        ];
        DecayScheduler::spawn_all(targets, self.config.estimator.decay_interval())
    }

    /// Reload rules from the repository
    pub async fn reload_rules(&self) -> Result<RuleLoadReport> {
        let report = self.rules.load_rules(self.repository.as_ref()).await?;
        if report.skipped > 0 {
            self.metrics.record_rule_compile_failures(report.skipped);
        }
        Ok(report)
    }

    /// Evaluate the four primary inputs under the default deadline
    pub async fn evaluate_risk(
        &self,
        actor_id: &str,
        ip: &str,
        device_id: &str,
        amount: Decimal,
    ) -> Result<RiskAnalysisResult> {
        self.evaluate_context(RiskContext::new(actor_id, ip, device_id, amount))
            .await
    }

    /// Evaluate a full context under the default deadline
    pub async fn evaluate_context(&self, ctx: RiskContext) -> Result<RiskAnalysisResult> {
        self.evaluate_risk_with_deadline(ctx, self.config.evaluation.default_deadline())
            .await
    }

    /// Evaluate a context, giving up once `deadline` has elapsed
    pub async fn evaluate_risk_with_deadline(
        &self,
        ctx: RiskContext,
        deadline: Duration,
    ) -> Result<RiskAnalysisResult> {
        let actor_id = ctx.actor_id.clone();
        match timeout(deadline, self.evaluate_inner(ctx)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(actor_id = %actor_id, deadline_ms = deadline.as_millis() as u64, "Evaluation deadline exceeded");
                Err(Error::DeadlineExceeded(deadline.as_millis()))
            }
        }
    }

    async fn evaluate_inner(&self, ctx: RiskContext) -> Result<RiskAnalysisResult> {
        let started = Instant::now();
        validate_context(&ctx)?;

        let result = match self.check_blacklist(&ctx).await {
            Some(entry) => {
                self.metrics.record_blacklist_override();
                info!(
                    actor_id = %ctx.actor_id,
                    entry_type = %entry.entry_type,
                    value = %entry.value,
                    "Blacklist override"
                );
                let item = RiskItem::new(
                    RiskItemType::Blacklist,
                    RiskScore::MAX,
                    format!("{} {} is blacklisted: {}", entry.entry_type, entry.value, entry.reason),
                );
                RiskAnalysisResult::new(&ctx.actor_id, RiskScore::MAX, vec![item])
            }
            None => self.score_signals(&ctx).await,
        };

        self.repository.append_result(&result).await.map_err(|e| {
            warn!(actor_id = %ctx.actor_id, error = %e, "Failed to persist analysis result");
            Error::Persistence(e.to_string())
        })?;

        self.metrics
            .record_evaluation(result.risk_level, started.elapsed().as_secs_f64());

        info!(
            actor_id = %result.actor_id,
            result_id = %result.result_id,
            score = result.score.score(),
            level = result.risk_level.as_str(),
            items = result.risk_items.len(),
            "Risk evaluated"
        );

        Ok(result)
    }

    /// Actor first, then IP. A failed lookup counts as no hit.
    async fn check_blacklist(&self, ctx: &RiskContext) -> Option<BlacklistEntry> {
        let now = Utc::now();
        let probes = [
            (BlacklistType::Actor, ctx.actor_id.as_str()),
            (BlacklistType::Ip, ctx.ip.as_str()),
        ];

        for (entry_type, value) in probes {
            match self
                .repository
                .find_active_blacklist(entry_type, value, now)
                .await
            {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => {
                    warn!(entry_type = %entry_type, error = %e, "Blacklist lookup failed");
                    self.metrics.record_degraded("blacklist");
                }
            }
        }

        None
    }

    async fn score_signals(&self, ctx: &RiskContext) -> RiskAnalysisResult {
        let mut signals = SignalSet::default();
        let mut items = Vec::new();

        // Amount
        let amount = self.scorer.amount_factor(ctx.amount);
        signals.amount = Some(amount);
        items.push(RiskItem::new(
            RiskItemType::Amount,
            RiskScore::from_normalized(amount),
            format!("amount {}", ctx.amount),
        ));

        let (snapshot, velocity, remote) = tokio::join!(
            self.previous_snapshot(&ctx.actor_id),
            self.velocity(&ctx.actor_id),
            self.remote_factor(ctx),
        );

        // Location
        if let Some(dev) = self.scorer.location_deviation(ctx, snapshot.as_ref()) {
            signals.location = Some(dev.factor);
            if dev.factor > 0.0 {
                items.push(RiskItem::new(
                    RiskItemType::Location,
                    RiskScore::from_normalized(dev.factor),
                    dev.reason(),
                ));
            }
        }

        // Bot
        let mut sample = BehaviorSample::new(&ctx.actor_id, &ctx.ip, EVALUATION_ACTION);
        sample.user_agent = ctx.user_agent.clone();
        let verdict = self.antibot.evaluate(&sample);
        let bot = if verdict.is_bot {
            1.0
        } else {
            verdict.score.normalized()
        };
        signals.bot = Some(bot);
        if bot > 0.0 {
            items.push(RiskItem::new(
                RiskItemType::Bot,
                RiskScore::from_normalized(bot),
                verdict.reason,
            ));
        }

        // Rules
        if self.rules.rule_count() > 0 {
            let facts = build_facts(ctx, velocity.as_ref());
            let matched = self.rules.evaluate(&facts);
            let total: u32 = matched.iter().map(|i| u32::from(i.score.score())).sum();
            signals.rules = Some(f64::from(total.min(100)) / 100.0);
            items.extend(matched);
        }

        // Remote
        if let Some((factor, item)) = remote {
            signals.remote = Some(factor);
            items.push(item);
        }

        let score = self.scorer.fuse(&signals);
        debug!(actor_id = %ctx.actor_id, ?signals, score = score.score(), "Signals fused");

        RiskAnalysisResult::new(&ctx.actor_id, score, items)
    }

    async fn previous_snapshot(&self, actor_id: &str) -> Option<BehaviorSnapshot> {
        match self.repository.behavior_snapshot(actor_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(actor_id = %actor_id, error = %e, "Behavior snapshot unavailable");
                self.metrics.record_degraded("location");
                None
            }
        }
    }

    async fn velocity(&self, actor_id: &str) -> Option<VelocityMetrics> {
        match self.repository.velocity_metrics(actor_id).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(actor_id = %actor_id, error = %e, "Velocity metrics unavailable");
                self.metrics.record_degraded("velocity");
                None
            }
        }
    }

    async fn remote_factor(&self, ctx: &RiskContext) -> Option<(f64, RiskItem)> {
        let client = self.remote.as_ref()?;
        let request = RemoteRiskRequest::from_context(ctx);
        let limit = self.config.remote.timeout();

        match timeout(limit, client.assess(&request)).await {
            Ok(Ok(verdict)) => {
                let factor = verdict.factor();
                let item = RiskItem::new(
                    RiskItemType::Remote,
                    RiskScore::from_normalized(factor),
                    format!("remote score {} (allowed: {})", verdict.score, verdict.allowed),
                );
                Some((factor, item))
            }
            Ok(Err(e)) => {
                warn!(actor_id = %ctx.actor_id, error = %e, "Remote risk assessment failed");
                self.metrics.record_degraded("remote");
                None
            }
            Err(_) => {
                warn!(
                    actor_id = %ctx.actor_id,
                    timeout_ms = limit.as_millis() as u64,
                    "Remote risk assessment timed out"
                );
                self.metrics.record_degraded("remote");
                None
            }
        }
    }

    /// Blacklist `value` for `duration`
    pub async fn add_to_blacklist(
        &self,
        entry_type: BlacklistType,
        value: &str,
        reason: &str,
        duration: Duration,
    ) -> Result<BlacklistEntry> {
        if value.trim().is_empty() {
            return Err(Error::Validation("blacklist value must not be empty".to_string()));
        }
        let ttl = chrono::Duration::from_std(duration)
            .map_err(|e| Error::Validation(format!("blacklist duration out of range: {}", e)))?;

        let now = Utc::now();
        let entry = BlacklistEntry {
            id: Uuid::new_v4(),
            entry_type,
            value: value.to_string(),
            reason: reason.to_string(),
            created_at: now,
            expires_at: now + ttl,
        };
        self.repository.insert_blacklist(entry.clone()).await?;

        info!(
            id = %entry.id,
            entry_type = %entry_type,
            value = %entry.value,
            expires_at = %entry.expires_at,
            "Blacklist entry added"
        );

        Ok(entry)
    }

    /// Returns whether an entry was removed
    pub async fn remove_from_blacklist(&self, id: Uuid) -> Result<bool> {
        let removed = self.repository.delete_blacklist(id).await?;
        info!(id = %id, removed, "Blacklist entry removal");
        Ok(removed)
    }

    /// Store the actor's current IP and device as the baseline for location deviation
    pub async fn record_behavior(&self, actor_id: &str, ip: &str, device_id: &str) -> Result<()> {
        if actor_id.trim().is_empty() {
            return Err(Error::Validation("actor_id must not be empty".to_string()));
        }
        let snapshot = BehaviorSnapshot {
            actor_id: actor_id.to_string(),
            last_ip: ip.to_string(),
            last_device_id: device_id.to_string(),
            recorded_at: Utc::now(),
        };
        self.repository.save_behavior_snapshot(snapshot).await?;
        debug!(actor_id = %actor_id, "Behavior snapshot recorded");
        Ok(())
    }

    /// Batch fraud ring scan over one relationship snapshot
    pub fn detect_fraud_rings(
        &self,
        actor_count: usize,
        edges: &[RelationshipEdge],
    ) -> Result<Vec<FraudRing>> {
        FraudRingDetector::detect(actor_count, edges)
    }
}

fn validate_context(ctx: &RiskContext) -> Result<()> {
    if ctx.actor_id.trim().is_empty() {
        return Err(Error::Validation("actor_id must not be empty".to_string()));
    }
    if ctx.amount.is_sign_negative() && !ctx.amount.is_zero() {
        return Err(Error::Validation(format!(
            "amount must not be negative, got {}",
            ctx.amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::types::{RiskLevel, Rule};
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<InMemoryRepository>, RiskAggregator) {
        let repo = Arc::new(InMemoryRepository::new());
        let aggregator = RiskAggregator::new(Config::default(), repo.clone()).unwrap();
        (repo, aggregator)
    }

    #[tokio::test]
    async fn test_amount_only_evaluation() {
        let (repo, aggregator) = setup();
        let result = aggregator
            .evaluate_risk("actor-1", "10.0.0.1", "dev-1", dec!(6000000))
            .await
            .unwrap();

        assert_eq!(result.score.score(), 9);
        assert_eq!(result.risk_level, RiskLevel::VeryLow);
        assert_eq!(result.risk_items.len(), 1);
        assert_eq!(result.risk_items[0].item_type, RiskItemType::Amount);
        assert_eq!(repo.results().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_actor_blacklist_override() {
        let (repo, aggregator) = setup();
        aggregator
            .add_to_blacklist(BlacklistType::Actor, "actor-1", "chargeback", Duration::from_secs(3600))
            .await
            .unwrap();

        let result = aggregator
            .evaluate_risk("actor-1", "10.0.0.1", "dev-1", dec!(5))
            .await
            .unwrap();

        assert_eq!(result.score, RiskScore::MAX);
        assert_eq!(result.risk_level, RiskLevel::Critical);
        assert_eq!(result.risk_items.len(), 1);
        assert_eq!(result.risk_items[0].item_type, RiskItemType::Blacklist);
        assert_eq!(repo.results().unwrap().len(), 1);
        assert_eq!(aggregator.metrics().blacklist_overrides.get(), 1);
    }

    #[tokio::test]
    async fn test_removed_entry_no_longer_overrides() {
        let (_repo, aggregator) = setup();
        let entry = aggregator
            .add_to_blacklist(BlacklistType::Ip, "6.6.6.6", "abuse", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(aggregator.remove_from_blacklist(entry.id).await.unwrap());

        let result = aggregator
            .evaluate_risk("actor-1", "6.6.6.6", "dev-1", dec!(5))
            .await
            .unwrap();
        assert_ne!(result.risk_level, RiskLevel::Critical);
    }

    #[tokio::test]
    async fn test_location_deviation_and_rules() {
        let (repo, aggregator) = setup();
        aggregator.record_behavior("actor-1", "1.1.1.1", "dev-1").await.unwrap();
        repo.put_rule(Rule::new("r-1", "large amount", "amount > 1000000", 100));
        aggregator.reload_rules().await.unwrap();

        let result = aggregator
            .evaluate_risk("actor-1", "2.2.2.2", "dev-2", dec!(2000000))
            .await
            .unwrap();

        // financial 0.3·1.0 + location 0.2·1.0 + amount 0.1·0.9
        assert_eq!(result.score.score(), 59);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        let types: Vec<_> = result.risk_items.iter().map(|i| i.item_type).collect();
        assert!(types.contains(&RiskItemType::Location));
        assert!(types.contains(&RiskItemType::Rule));
    }

    #[tokio::test]
    async fn test_automation_user_agent_drives_bot_weight() {
        let (_repo, aggregator) = setup();
        let ctx = RiskContext::new("actor-1", "10.0.0.1", "dev-1", dec!(60000))
            .with_user_agent("curl/8.0");
        let result = aggregator.evaluate_context(ctx).await.unwrap();

        // bot 0.4·1.0 + amount 0.1·0.3
        assert_eq!(result.score.score(), 43);
        assert!(result
            .risk_items
            .iter()
            .any(|i| i.item_type == RiskItemType::Bot && i.reason.contains("curl")));
    }

    #[tokio::test]
    async fn test_invalid_input_is_fatal() {
        let (repo, aggregator) = setup();
        let err = aggregator
            .evaluate_risk("  ", "10.0.0.1", "dev-1", dec!(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = aggregator
            .evaluate_risk("actor-1", "10.0.0.1", "dev-1", dec!(-1))
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(repo.results().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_failures_degrade() {
        let (repo, aggregator) = setup();
        repo.fail_reads(true);

        let result = aggregator
            .evaluate_risk("actor-1", "10.0.0.1", "dev-1", dec!(60000))
            .await
            .unwrap();
        assert_eq!(result.score.score(), 3);
        assert!(aggregator
            .metrics()
            .degraded_signals
            .with_label_values(&["blacklist"])
            .get() >= 1);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_fatal() {
        let (repo, aggregator) = setup();
        repo.fail_appends(true);
        let err = aggregator
            .evaluate_risk("actor-1", "10.0.0.1", "dev-1", dec!(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(aggregator.metrics().evaluations_total.get(), 0);
    }

    #[tokio::test]
    async fn test_reload_failure_keeps_rules() {
        let (repo, aggregator) = setup();
        repo.put_rule(Rule::new("r-1", "any", "amount >= 0", 10));
        repo.put_rule(Rule::new("r-2", "broken", "amount >>", 10));
        let report = aggregator.reload_rules().await.unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(aggregator.metrics().rule_compile_failures.get(), 1);

        repo.fail_reads(true);
        assert!(aggregator.reload_rules().await.is_err());
        assert_eq!(aggregator.rules().rule_count(), 1);
    }

    #[tokio::test]
    async fn test_blacklist_rejects_empty_value() {
        let (_repo, aggregator) = setup();
        let err = aggregator
            .add_to_blacklist(BlacklistType::Email, "", "spam", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_enabled_remote_is_built_from_config() {
        let (_repo, aggregator) = setup();
        assert!(!aggregator.has_remote());

        let mut config = Config::default();
        config.remote.enabled = true;
        config.remote.endpoint = "http://127.0.0.1:9/v1/risk/assess".to_string();
        let aggregator =
            RiskAggregator::new(config, Arc::new(InMemoryRepository::new())).unwrap();
        assert!(aggregator.has_remote());
    }

    #[tokio::test]
    async fn test_decay_prunes_idle_actors() {
        let (_repo, aggregator) = setup();
        let long_ago = Utc::now() - chrono::Duration::minutes(5);
        for i in 0..50 {
            aggregator.antibot().evaluate(
                &BehaviorSample::new(&format!("actor-{}", i), "192.0.2.1", "browse").at(long_ago),
            );
        }
        assert_eq!(aggregator.antibot().tracked_actors(), 50);

        let handle = aggregator.spawn_decay();
        handle.decay_now().await.unwrap();
        assert_eq!(aggregator.antibot().tracked_actors(), 0);
        assert!(aggregator.estimator().estimate("ip:192.0.2.1") <= 25);
        handle.shutdown().await;
    }
}
