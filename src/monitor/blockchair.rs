// Blockchair address dashboards for BTC and LTC

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::ChainError;
use crate::escrow::types::Currency;
use crate::monitor::{BalanceReport, ChainSource};

#[derive(Clone)]
pub struct BlockchairSource {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    btc_conf: u64,
    ltc_conf: u64,
}

#[derive(Deserialize)]
struct Dashboard {
    data: HashMap<String, AddressEntry>,
    context: DashboardContext,
}

#[derive(Deserialize)]
struct DashboardContext {
    /// Current chain height.
    state: i64,
}

#[derive(Deserialize)]
struct AddressEntry {
    #[serde(default)]
    utxo: Vec<Utxo>,
}

#[derive(Deserialize)]
struct Utxo {
    /// -1 while the transaction sits in the mempool.
    block_id: i64,
    value: u64,
}

impl BlockchairSource {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, btc_conf: u64, ltc_conf: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            btc_conf,
            ltc_conf,
        }
    }

    fn chain_and_conf(&self, currency: Currency) -> Result<(&'static str, u64), ChainError> {
        match currency {
            Currency::Btc => Ok(("bitcoin", self.btc_conf)),
            Currency::Ltc => Ok(("litecoin", self.ltc_conf)),
            other => Err(ChainError::Unsupported(other)),
        }
    }
}

#[async_trait]
impl ChainSource for BlockchairSource {
    async fn check_balance(
        &self,
        address: &str,
        currency: Currency,
    ) -> Result<BalanceReport, ChainError> {
        let (chain, required) = self.chain_and_conf(currency)?;
        let url = format!("{}/{}/dashboards/address/{}", self.base_url, chain, address);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.api_key {
            req = req.query(&[("key", key)]);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ChainError::Status {
                status: status.as_u16(),
            });
        }
        let body: Value = resp.json().await?;
        summarize(body, required)
    }
}

/// Split the UTXO set into confirmed (>= `required` confirmations) and pending.
fn summarize(body: Value, required: u64) -> Result<BalanceReport, ChainError> {
    let dash: Dashboard =
        serde_json::from_value(body).map_err(|e| ChainError::Malformed(e.to_string()))?;
    let entry = dash
        .data
        .into_values()
        .next()
        .ok_or_else(|| ChainError::Malformed("dashboard has no address entry".into()))?;
    let tip = dash.context.state;
    let mut report = BalanceReport::default();
    for utxo in entry.utxo {
        let confirmations = if utxo.block_id > 0 && tip >= utxo.block_id {
            (tip - utxo.block_id + 1) as u64
        } else {
            0
        };
        if confirmations >= required.max(1) {
            report.confirmed = report.confirmed.saturating_add(utxo.value);
        } else {
            report.pending = report.pending.saturating_add(utxo.value);
        }
    }
    Ok(report)
}
