use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::models::OracleData;

use super::OracleSource;

/// Polls a reference price feed (crypto exchange, economic data service,
/// weather API) exposing `{symbol: "...", price: "..."}`-shaped JSON,
/// generalized from the teacher's Chainlink feed poller in
/// `scrapers/` into a source-agnostic adapter (spec.md §4.3).
pub struct ReferenceOracle {
    name: String,
    client: reqwest::Client,
    base_url: String,
}

impl ReferenceOracle {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client builds with static config");
        ReferenceOracle { name: name.into(), client, base_url: base_url.into() }
    }
}

#[async_trait]
impl OracleSource for ReferenceOracle {
    fn source(&self) -> &str {
        &self.name
    }

    async fn get_current(&self, symbol: &str) -> Result<OracleData> {
        let url = format!("{}/price/{}", self.base_url, symbol);
        let resp = self.client.get(&url).send().await.context("oracle request failed")?;
        if !resp.status().is_success() {
            return Err(anyhow::anyhow!("{} oracle returned {}", self.name, resp.status()).into());
        }
        let body: serde_json::Value = resp.json().await.context("oracle body was not json")?;
        let value = body
            .get("price")
            .and_then(|v| v.as_str().and_then(|s| Decimal::from_str_exact(s).ok()).or_else(|| v.as_f64().and_then(|f| Decimal::try_from(f).ok())))
            .unwrap_or(Decimal::ZERO);

        Ok(OracleData {
            source: self.name.clone(),
            symbol: symbol.to_string(),
            value,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        })
    }
}
