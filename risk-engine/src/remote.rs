//! Optional remote risk collaborator

use crate::config::RemoteConfig;
use crate::types::{OrderSide, RiskContext};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Assessment request forwarded to the remote service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRiskRequest {
    pub actor_id: String,
    pub instrument_symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
}

impl RemoteRiskRequest {
    /// Build from a context. The whole amount is sent as one unit at `amount`.
    pub fn from_context(ctx: &RiskContext) -> Self {
        Self {
            actor_id: ctx.actor_id.clone(),
            instrument_symbol: ctx.instrument_symbol.clone().unwrap_or_default(),
            side: ctx.side,
            quantity: Decimal::ONE,
            price: ctx.amount,
        }
    }
}

/// Remote verdict; `score` is on the 0-100 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRiskResponse {
    pub score: f64,
    pub allowed: bool,
}

impl RemoteRiskResponse {
    /// Factor in [0,1]; a refusal is the maximum regardless of score
    pub fn factor(&self) -> f64 {
        if !self.allowed {
            return 1.0;
        }
        if !self.score.is_finite() {
            return 0.0;
        }
        (self.score / 100.0).clamp(0.0, 1.0)
    }
}

/// Remote risk assessment service
#[async_trait]
pub trait RemoteRiskClient: Send + Sync {
    async fn assess(&self, request: &RemoteRiskRequest) -> Result<RemoteRiskResponse>;
}

/// JSON-over-HTTP client
pub struct HttpRemoteRiskClient {
    endpoint: String,
    client: Client,
}

impl HttpRemoteRiskClient {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl RemoteRiskClient for HttpRemoteRiskClient {
    async fn assess(&self, request: &RemoteRiskRequest) -> Result<RemoteRiskResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "Remote risk request failed");
                Error::RemoteUnavailable(format!("request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteUnavailable(format!(
                "status {}: {}",
                status, body
            )));
        }

        let verdict = response
            .json::<RemoteRiskResponse>()
            .await
            .map_err(|e| Error::RemoteUnavailable(format!("Failed to parse response: {}", e)))?;

        debug!(
            actor_id = %request.actor_id,
            score = verdict.score,
            allowed = verdict.allowed,
            "Remote risk verdict"
        );

        Ok(verdict)
    }
}
