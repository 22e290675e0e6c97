//! Hot-swappable predicate rules
//!
//! Rules are stored as expression text and compiled once per reload into an
//! expression tree. The compiled list lives behind an [`ArcSwap`]; a reload
//! builds a fresh list and swaps the pointer, so evaluations already in
//! flight finish against the list they started with.

mod eval;
mod parser;

pub use eval::{FactValue, Facts};

use crate::repository::RiskRepository;
use crate::types::{RiskContext, RiskItem, RiskItemType, RiskScore, Rule, VelocityMetrics};
use crate::{Error, Result};
use arc_swap::ArcSwap;
use eval::Expr;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A rule whose expression parsed successfully
#[derive(Debug, Clone)]
pub struct CompiledRule {
    id: String,
    name: String,
    score: RiskScore,
    predicate: Expr,
}

impl CompiledRule {
    /// Parse the rule's expression
    pub fn compile(rule: &Rule) -> Result<Self> {
        let predicate = parser::parse(&rule.expression).map_err(|message| Error::RuleCompile {
            rule_id: rule.id.clone(),
            message,
        })?;

        Ok(Self {
            id: rule.id.clone(),
            name: rule.name.clone(),
            score: rule.score,
            predicate,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn score(&self) -> RiskScore {
        self.score
    }

    /// Run the predicate. Anything other than a boolean result is an error.
    pub fn matches(&self, facts: &Facts) -> Result<bool> {
        self.predicate.eval_bool(facts)
    }
}

/// Outcome of one reload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuleLoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// Rule engine
pub struct RuleEngine {
    rules: ArcSwap<Vec<CompiledRule>>,
}

impl RuleEngine {
    /// Create an engine with no rules
    pub fn new() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Reload enabled rules from the repository
    ///
    /// If the repository cannot be read the current set stays in place and
    /// the error is returned.
    pub async fn load_rules(&self, repository: &dyn RiskRepository) -> Result<RuleLoadReport> {
        let rules = repository.enabled_rules().await.map_err(|e| {
            warn!(error = %e, "Rule reload failed, keeping previous rule set");
            e
        })?;
        Ok(self.replace_rules(&rules))
    }

    /// Compile and install `rules`, skipping disabled ones and any that fail to compile
    pub fn replace_rules(&self, rules: &[Rule]) -> RuleLoadReport {
        let mut compiled = Vec::with_capacity(rules.len());
        let mut report = RuleLoadReport::default();

        for rule in rules.iter().filter(|r| r.enabled) {
            match CompiledRule::compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "Skipping rule");
                    report.skipped += 1;
                }
            }
        }

        report.loaded = compiled.len();
        self.rules.store(Arc::new(compiled));

        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            "Rule set installed"
        );

        report
    }

    /// Evaluate every rule; one risk item per match
    pub fn evaluate(&self, facts: &Facts) -> Vec<RiskItem> {
        let rules = self.rules.load();
        let mut items = Vec::new();

        for rule in rules.iter() {
            match rule.matches(facts) {
                Ok(true) => items.push(RiskItem::new(
                    RiskItemType::Rule,
                    rule.score,
                    format!("rule matched: {}", rule.name),
                )),
                Ok(false) => {}
                Err(e) => {
                    debug!(rule_id = %rule.id, error = %e, "Rule evaluation failed");
                }
            }
        }

        items
    }

    /// Number of rules currently installed
    pub fn rule_count(&self) -> usize {
        self.rules.load().len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Flatten a context, joined with velocity metrics when available, into rule facts
///
/// Optional context fields are present only when set, so a rule that reads
/// an absent one fails rather than matching against an empty value.
pub fn build_facts(ctx: &RiskContext, velocity: Option<&VelocityMetrics>) -> Facts {
    let mut facts = Facts::new();
    facts.insert("actor_id".into(), ctx.actor_id.as_str().into());
    facts.insert("ip".into(), ctx.ip.as_str().into());
    facts.insert("device_id".into(), ctx.device_id.as_str().into());
    facts.insert("amount".into(), decimal_fact(ctx.amount));

    if let Some(method) = &ctx.payment_method {
        facts.insert("payment_method".into(), method.as_str().into());
    }
    if let Some(order_id) = &ctx.order_id {
        facts.insert("order_id".into(), order_id.as_str().into());
    }

    if let Some(v) = velocity {
        facts.insert("tx_count_1h".into(), v.tx_count_1h.into());
        facts.insert("tx_amount_1h".into(), decimal_fact(v.tx_amount_1h));
        facts.insert("tx_count_24h".into(), v.tx_count_24h.into());
        facts.insert("tx_amount_24h".into(), decimal_fact(v.tx_amount_24h));
        facts.insert("failed_tx_count_1h".into(), v.failed_tx_count_1h.into());
    }

    facts
}

fn decimal_fact(value: rust_decimal::Decimal) -> FactValue {
    FactValue::Number(value.to_f64().unwrap_or(0.0))
}
