//! Lightweight bot heuristics
//!
//! Runs on every request, so every check is O(1): one sketch lookup, one
//! map lookup per actor and IP, and a substring scan of the user agent.
//!
//! Cadence history is bounded: new actors are not tracked once
//! `max_tracked_actors` is reached, and entries older than the minimum
//! action interval are pruned whenever the decay scheduler ticks.

use crate::config::AntiBotConfig;
use crate::frequency::{Decay, FrequencyEstimator};
use crate::types::RiskScore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// User-agent fragments produced by automation tooling
const AUTOMATION_SIGNATURES: [&str; 12] = [
    "curl",
    "wget",
    "python-requests",
    "python-urllib",
    "go-http-client",
    "okhttp",
    "headless",
    "selenium",
    "phantomjs",
    "puppeteer",
    "playwright",
    "scrapy",
];

/// Self-declared crawlers
const CRAWLER_SIGNATURES: [&str; 3] = ["bot", "spider", "crawler"];

// Heuristic contributions to the continuous score
const WEIGHT_USER_AGENT: f64 = 35.0;
const WEIGHT_RATE: f64 = 35.0;
const WEIGHT_CADENCE: f64 = 15.0;
const WEIGHT_REPUTATION: f64 = 15.0;

/// One observed action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorSample {
    pub actor_id: String,
    pub ip: String,
    /// `None` when the caller has no user agent to offer
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub action: String,
}

impl BehaviorSample {
    pub fn new(actor_id: &str, ip: &str, action: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            ip: ip.to_string(),
            user_agent: None,
            timestamp: Utc::now(),
            action: action.to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Detector output. `is_bot` and `score` are computed independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotVerdict {
    pub is_bot: bool,
    pub reason: String,
    pub score: RiskScore,
}

/// Heuristic bot detector
pub struct AntiBotDetector {
    config: AntiBotConfig,
    requests: Arc<FrequencyEstimator>,
    // Map: actor_id -> last action time
    last_seen: DashMap<String, DateTime<Utc>>,
    // Map: ip -> badness in [0,1]
    ip_reputation: DashMap<String, f64>,
}

impl AntiBotDetector {
    /// Create a detector counting requests in the shared estimator
    pub fn new(config: AntiBotConfig, requests: Arc<FrequencyEstimator>) -> Self {
        Self {
            config,
            requests,
            last_seen: DashMap::new(),
            ip_reputation: DashMap::new(),
        }
    }

    /// Set how bad an IP is known to be (clamped to [0,1])
    pub fn set_ip_reputation(&self, ip: &str, badness: f64) {
        self.ip_reputation.insert(ip.to_string(), badness.clamp(0.0, 1.0));
    }

    pub fn clear_ip_reputation(&self, ip: &str) {
        self.ip_reputation.remove(ip);
    }

    /// Record the sample and classify it
    pub fn evaluate(&self, sample: &BehaviorSample) -> BotVerdict {
        let ip_key = format!("ip:{}", sample.ip);
        self.requests.add(&ip_key, 1);
        let request_count = self.requests.estimate(&ip_key);

        let previous = self.touch_actor(sample);

        let reputation = self
            .ip_reputation
            .get(&sample.ip)
            .map(|r| *r.value())
            .unwrap_or(0.0);

        let ua = sample.user_agent.as_deref().map(classify_user_agent);

        let mut score = 0.0;
        let mut decisive: Option<String> = None;
        let mut notes: Vec<String> = Vec::new();

        match ua {
            Some(UserAgentClass::Automation(sig)) => {
                score += WEIGHT_USER_AGENT;
                decisive.get_or_insert_with(|| format!("automation user agent ({})", sig));
            }
            Some(UserAgentClass::Crawler(sig)) => {
                score += WEIGHT_USER_AGENT * 0.6;
                notes.push(format!("self-declared crawler ({})", sig));
            }
            Some(UserAgentClass::Empty) => {
                score += WEIGHT_USER_AGENT * 0.6;
                notes.push("empty user agent".to_string());
            }
            Some(UserAgentClass::Browser) | None => {}
        }

        if request_count > self.config.soft_rate_limit {
            let span = self
                .config
                .hard_rate_limit
                .saturating_sub(self.config.soft_rate_limit)
                .max(1) as f64;
            let over = (request_count - self.config.soft_rate_limit) as f64;
            score += WEIGHT_RATE * (over / span).min(1.0);
            if request_count >= self.config.hard_rate_limit {
                decisive.get_or_insert_with(|| {
                    format!("request rate {} from {} over limit", request_count, sample.ip)
                });
            } else {
                notes.push(format!("elevated request rate {}", request_count));
            }
        }

        if let Some(previous) = previous {
            let interval_ms = (sample.timestamp - previous).num_milliseconds();
            if interval_ms >= 0 && interval_ms < self.config.min_action_interval_ms {
                score += WEIGHT_CADENCE;
                notes.push(format!("actions {}ms apart", interval_ms));
            }
        }

        if reputation > 0.0 {
            score += WEIGHT_REPUTATION * reputation;
            if reputation >= self.config.reputation_block_threshold {
                decisive.get_or_insert_with(|| format!("ip {} has bad reputation", sample.ip));
            } else {
                notes.push(format!("ip reputation {:.2}", reputation));
            }
        }

        let score = RiskScore::from_normalized(score / 100.0);
        let verdict = match decisive {
            Some(reason) => BotVerdict {
                is_bot: true,
                reason,
                score,
            },
            None => BotVerdict {
                is_bot: false,
                reason: if notes.is_empty() {
                    "no bot indicators".to_string()
                } else {
                    notes.join("; ")
                },
                score,
            },
        };

        debug!(
            actor_id = %sample.actor_id,
            ip = %sample.ip,
            action = %sample.action,
            is_bot = verdict.is_bot,
            score = verdict.score.score(),
            "Bot heuristics evaluated"
        );

        verdict
    }

    /// Swap in the new action time, returning the previous one
    fn touch_actor(&self, sample: &BehaviorSample) -> Option<DateTime<Utc>> {
        if let Some(mut entry) = self.last_seen.get_mut(&sample.actor_id) {
            return Some(std::mem::replace(entry.value_mut(), sample.timestamp));
        }
        if self.last_seen.len() >= self.config.max_tracked_actors {
            debug!(actor_id = %sample.actor_id, "Cadence history full, actor not tracked");
            return None;
        }
        self.last_seen.insert(sample.actor_id.clone(), sample.timestamp)
    }

    /// Drop cadence history that can no longer flag a fast action at `now`
    ///
    /// Returns the number of actors forgotten.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.last_seen.len();
        let window = chrono::Duration::milliseconds(self.config.min_action_interval_ms);
        self.last_seen.retain(|_, seen| now - *seen < window);
        let pruned = before.saturating_sub(self.last_seen.len());
        if pruned > 0 {
            debug!(pruned, remaining = self.last_seen.len(), "Idle actors pruned");
        }
        pruned
    }

    /// Forget the cadence history of one actor
    pub fn forget_actor(&self, actor_id: &str) {
        self.last_seen.remove(actor_id);
    }

    /// Number of actors with cadence history
    pub fn tracked_actors(&self) -> usize {
        self.last_seen.len()
    }
}

impl Decay for AntiBotDetector {
    fn decay(&self) {
        self.prune_idle(Utc::now());
    }
}

#[derive(Debug, Clone, PartialEq)]
enum UserAgentClass {
    Browser,
    Empty,
    Automation(&'static str),
    Crawler(&'static str),
}

fn classify_user_agent(ua: &str) -> UserAgentClass {
    let ua = ua.trim().to_lowercase();
    if ua.is_empty() {
        return UserAgentClass::Empty;
    }
    if let Some(sig) = AUTOMATION_SIGNATURES.iter().copied().find(|s| ua.contains(s)) {
        return UserAgentClass::Automation(sig);
    }
    if let Some(sig) = CRAWLER_SIGNATURES.iter().copied().find(|s| ua.contains(s)) {
        return UserAgentClass::Crawler(sig);
    }
    UserAgentClass::Browser
}
