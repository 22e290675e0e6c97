//! Fraud Risk Engine
//!
//! Real-time risk evaluation for commerce transactions: blacklist override,
//! bot heuristics over an approximate request counter, hot-swappable rules,
//! an optional remote assessment and weighted fusion into a 0-100 score.
//! Fraud ring detection runs separately, in batch, over relationship
//! snapshots.

#![forbid(unsafe_code)]

pub mod aggregator;
pub mod antibot;
pub mod config;
pub mod error;
pub mod fraud_ring;
pub mod frequency;
pub mod metrics;
pub mod remote;
pub mod repository;
pub mod rules;
pub mod scoring;
pub mod types;

pub use aggregator::RiskAggregator;
pub use antibot::{AntiBotDetector, BehaviorSample, BotVerdict};
pub use config::Config;
pub use error::{Error, Result};
pub use fraud_ring::{FraudRingDetector, RelationKind, RelationshipEdge, RelationshipGraphBuilder};
pub use frequency::{Decay, DecayHandle, DecayScheduler, FrequencyEstimator};
pub use metrics::RiskMetrics;
pub use remote::{HttpRemoteRiskClient, RemoteRiskClient, RemoteRiskRequest, RemoteRiskResponse};
pub use repository::{InMemoryRepository, RiskRepository};
pub use rules::{FactValue, Facts, RuleEngine};
pub use scoring::RiskScorer;
pub use types::*;
