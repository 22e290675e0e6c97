//! Core types for risk engine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Risk score (0-100)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RiskScore(u8);

impl RiskScore {
    /// Highest possible score
    pub const MAX: RiskScore = RiskScore(100);

    /// Create new risk score, clamped to 0-100
    pub fn new(score: u8) -> Self {
        Self(score.min(100))
    }

    /// Build a score from a normalised value in [0,1]
    ///
    /// The value is scaled by 100, rounded to the nearest integer and
    /// clamped. Non-finite input maps to zero.
    pub fn from_normalized(value: f64) -> Self {
        if !value.is_finite() {
            return Self(0);
        }
        Self((value * 100.0).round().clamp(0.0, 100.0) as u8)
    }

    /// Get raw score
    pub fn score(&self) -> u8 {
        self.0
    }

    /// Score as a fraction in [0,1]
    pub fn normalized(&self) -> f64 {
        f64::from(self.0) / 100.0
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Risk level ladder, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// 0-19
    VeryLow,
    /// 20-39
    Low,
    /// 40-59
    Medium,
    /// 60-80
    High,
    /// 81-100
    Critical,
}

impl RiskLevel {
    /// All levels in ascending order
    pub const ALL: [RiskLevel; 5] = [
        RiskLevel::VeryLow,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    /// Classify a score. This is the only place thresholds live.
    pub fn classify(score: RiskScore) -> Self {
        match score.score() {
            0..=19 => RiskLevel::VeryLow,
            20..=39 => RiskLevel::Low,
            40..=59 => RiskLevel::Medium,
            60..=80 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Stable lowercase name, used for metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "very_low",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl From<RiskScore> for RiskLevel {
    fn from(score: RiskScore) -> Self {
        RiskLevel::classify(score)
    }
}

/// Side of the order forwarded to the remote assessment service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Purchase
    #[default]
    Buy,
    /// Sale
    Sell,
}

/// Ephemeral input describing one transaction attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskContext {
    pub actor_id: String,
    pub ip: String,
    pub device_id: String,
    pub amount: Decimal,
    pub payment_method: Option<String>,
    pub order_id: Option<String>,
    pub user_agent: Option<String>,
    pub instrument_symbol: Option<String>,
    pub side: OrderSide,
}

impl RiskContext {
    /// Create a context from the four primary inputs
    pub fn new(actor_id: &str, ip: &str, device_id: &str, amount: Decimal) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            ip: ip.to_string(),
            device_id: device_id.to_string(),
            amount,
            payment_method: None,
            order_id: None,
            user_agent: None,
            instrument_symbol: None,
            side: OrderSide::Buy,
        }
    }

    pub fn with_payment_method(mut self, method: &str) -> Self {
        self.payment_method = Some(method.to_string());
        self
    }

    pub fn with_order_id(mut self, order_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }

    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        self.user_agent = Some(user_agent.to_string());
        self
    }

    pub fn with_instrument(mut self, symbol: &str, side: OrderSide) -> Self {
        self.instrument_symbol = Some(symbol.to_string());
        self.side = side;
        self
    }
}

/// Origin of a risk item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskItemType {
    Blacklist,
    Amount,
    Location,
    Bot,
    Remote,
    Rule,
}

/// Single contributing signal inside an analysis result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    #[serde(rename = "type")]
    pub item_type: RiskItemType,
    pub level: RiskLevel,
    pub score: RiskScore,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl RiskItem {
    /// Create an item; the level is derived from the score
    pub fn new(item_type: RiskItemType, score: RiskScore, reason: impl Into<String>) -> Self {
        Self {
            item_type,
            level: RiskLevel::classify(score),
            score,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only aggregate produced by one evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAnalysisResult {
    pub result_id: Uuid,
    pub actor_id: String,
    pub score: RiskScore,
    pub risk_level: RiskLevel,
    pub risk_items: Vec<RiskItem>,
    pub created_at: DateTime<Utc>,
}

impl RiskAnalysisResult {
    /// Assemble a result; the level always follows from the score
    pub fn new(actor_id: &str, score: RiskScore, risk_items: Vec<RiskItem>) -> Self {
        Self {
            result_id: Uuid::new_v4(),
            actor_id: actor_id.to_string(),
            score,
            risk_level: RiskLevel::classify(score),
            risk_items,
            created_at: Utc::now(),
        }
    }

    /// Persisted representation of the item list: a JSON array of
    /// `{type, level, score, reason, timestamp}` objects
    pub fn risk_items_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.risk_items)
    }
}

/// What a blacklist entry matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistType {
    Actor,
    Ip,
    Device,
    Email,
    Phone,
}

impl BlacklistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlacklistType::Actor => "actor",
            BlacklistType::Ip => "ip",
            BlacklistType::Device => "device",
            BlacklistType::Email => "email",
            BlacklistType::Phone => "phone",
        }
    }
}

impl fmt::Display for BlacklistType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blacklist entry. Entries are created or deleted, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: Uuid,
    pub entry_type: BlacklistType,
    pub value: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl BlacklistEntry {
    /// Active iff `now < expires_at`
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Last known network identity of an actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorSnapshot {
    pub actor_id: String,
    pub last_ip: String,
    pub last_device_id: String,
    pub recorded_at: DateTime<Utc>,
}

/// Rolling-window transaction aggregates for an actor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityMetrics {
    pub tx_count_1h: u32,
    pub tx_amount_1h: Decimal,
    pub tx_count_24h: u32,
    pub tx_amount_24h: Decimal,
    pub failed_tx_count_1h: u32,
}

/// Stored detection rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub expression: String,
    pub score: RiskScore,
    pub enabled: bool,
}

impl Rule {
    pub fn new(id: &str, name: &str, expression: &str, score: u8) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            expression: expression.to_string(),
            score: RiskScore::new(score),
            enabled: true,
        }
    }
}

/// Cluster of mutually reachable actors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FraudRing<T = usize> {
    pub members: Vec<T>,
}

impl<T> FraudRing<T> {
    pub fn size(&self) -> usize {
        self.members.len()
    }
}
