//! Weighted signal fusion
//!
//! Every signal is a factor in [0,1]. The final score is
//! `round(100 · Σ weight · factor)` clamped to [0,100]. A signal that was not
//! collected contributes nothing; the remaining weights are not rescaled.

use crate::config::ScoringConfig;
use crate::types::{BehaviorSnapshot, RiskContext, RiskScore};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Factors collected for one evaluation; `None` means omitted
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalSet {
    pub bot: Option<f64>,
    pub rules: Option<f64>,
    pub remote: Option<f64>,
    pub location: Option<f64>,
    pub amount: Option<f64>,
}

impl SignalSet {
    /// Rules and remote assessment share one weight; the stronger wins
    pub fn financial(&self) -> Option<f64> {
        match (self.rules, self.remote) {
            (Some(r), Some(x)) => Some(r.max(x)),
            (r, x) => r.or(x),
        }
    }
}

/// Location deviation against the last known snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct LocationDeviation {
    pub factor: f64,
    pub ip_changed: bool,
    pub device_changed: bool,
}

impl LocationDeviation {
    pub fn reason(&self) -> String {
        match (self.ip_changed, self.device_changed) {
            (true, true) => "ip and device changed since last seen".to_string(),
            (true, false) => "ip changed since last seen".to_string(),
            (false, true) => "device changed since last seen".to_string(),
            (false, false) => "ip and device unchanged".to_string(),
        }
    }
}

/// Weighted scorer
pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    /// Create new risk scorer
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Map an amount onto the tier table
    pub fn amount_factor(&self, amount: Decimal) -> f64 {
        let amount = amount.to_f64().unwrap_or(f64::MAX);

        self.config
            .amount_tiers
            .iter()
            .find(|tier| amount <= tier.up_to)
            .map(|tier| tier.factor)
            .unwrap_or(self.config.max_amount_factor)
            .clamp(0.0, 1.0)
    }

    /// Compare the context with the previous snapshot; `None` without history
    pub fn location_deviation(
        &self,
        ctx: &RiskContext,
        previous: Option<&BehaviorSnapshot>,
    ) -> Option<LocationDeviation> {
        let previous = previous?;
        let ip_changed = previous.last_ip != ctx.ip;
        let device_changed = previous.last_device_id != ctx.device_id;

        let mut factor = 0.0;
        if ip_changed {
            factor += 0.5;
        }
        if device_changed {
            factor += 0.5;
        }

        Some(LocationDeviation {
            factor,
            ip_changed,
            device_changed,
        })
    }

    /// Fuse the collected signals into one score
    pub fn fuse(&self, signals: &SignalSet) -> RiskScore {
        let c = &self.config;
        let weighted = [
            (c.bot_weight, signals.bot),
            (c.financial_weight, signals.financial()),
            (c.location_weight, signals.location),
            (c.amount_weight, signals.amount),
        ];

        let total: f64 = weighted
            .iter()
            .filter_map(|(w, f)| f.map(|f| w * f.clamp(0.0, 1.0)))
            .sum();

        RiskScore::from_normalized(total)
    }
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_tiers() {
        let scorer = RiskScorer::default();
        assert_eq!(scorer.amount_factor(dec!(0)), 0.05);
        assert_eq!(scorer.amount_factor(dec!(10000)), 0.05);
        assert_eq!(scorer.amount_factor(dec!(10000.01)), 0.15);
        assert_eq!(scorer.amount_factor(dec!(750000)), 0.70);
        assert_eq!(scorer.amount_factor(dec!(6000000)), 0.90);
    }

    #[test]
    fn test_location_deviation() {
        let scorer = RiskScorer::default();
        let ctx = RiskContext::new("a", "2.2.2.2", "dev-1", dec!(1));
        assert!(scorer.location_deviation(&ctx, None).is_none());

        let snapshot = BehaviorSnapshot {
            actor_id: "a".into(),
            last_ip: "1.1.1.1".into(),
            last_device_id: "dev-1".into(),
            recorded_at: Utc::now(),
        };
        let dev = scorer.location_deviation(&ctx, Some(&snapshot)).unwrap();
        assert_eq!(dev.factor, 0.5);
        assert!(dev.ip_changed);
        assert!(!dev.device_changed);
        assert_eq!(dev.reason(), "ip changed since last seen");
    }

    #[test]
    fn test_amount_only() {
        let scorer = RiskScorer::default();
        let signals = SignalSet {
            amount: Some(0.9),
            ..Default::default()
        };
        assert_eq!(scorer.fuse(&signals).score(), 9);
    }

    #[test]
    fn test_all_signals_maxed() {
        let scorer = RiskScorer::default();
        let signals = SignalSet {
            bot: Some(1.0),
            rules: Some(1.0),
            remote: None,
            location: Some(1.0),
            amount: Some(1.0),
        };
        assert_eq!(scorer.fuse(&signals), RiskScore::MAX);
    }

    #[test]
    fn test_financial_takes_max() {
        let signals = SignalSet {
            rules: Some(0.3),
            remote: Some(0.8),
            ..Default::default()
        };
        assert_eq!(signals.financial(), Some(0.8));

        let scorer = RiskScorer::default();
        assert_eq!(scorer.fuse(&signals).score(), 24);

        let rules_only = SignalSet {
            rules: Some(0.3),
            ..Default::default()
        };
        assert_eq!(rules_only.financial(), Some(0.3));
        assert_eq!(SignalSet::default().financial(), None);
    }

    #[test]
    fn test_omitted_signals_are_not_renormalised() {
        let scorer = RiskScorer::default();
        let signals = SignalSet {
            bot: Some(1.0),
            ..Default::default()
        };
        assert_eq!(scorer.fuse(&signals).score(), 40);
    }
}
