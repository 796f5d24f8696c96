// Solana JSON-RPC balance source (native SOL only)

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use crate::errors::ChainError;
use crate::escrow::types::Currency;
use crate::monitor::{BalanceReport, ChainSource};

#[derive(Clone)]
pub struct SolanaRpcSource {
    client: reqwest::Client,
    rpc_url: String,
}

impl SolanaRpcSource {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            rpc_url: rpc_url.into(),
        }
    }

    async fn get_balance(&self, address: &str, commitment: &str) -> Result<u64, ChainError> {
        let req = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [address, { "commitment": commitment }]
        });
        let resp = self.client.post(&self.rpc_url).json(&req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ChainError::Status {
                status: status.as_u16(),
            });
        }
        let v: Value = resp.json().await?;
        lamports_from(&v)
    }
}

fn lamports_from(v: &Value) -> Result<u64, ChainError> {
    if let Some(err) = v.get("error") {
        return Err(ChainError::Malformed(format!("rpc error: {}", err)));
    }
    v.get("result")
        .and_then(|r| r.get("value"))
        .and_then(Value::as_u64)
        .ok_or_else(|| ChainError::Malformed("getBalance result missing value".into()))
}

#[async_trait]
impl ChainSource for SolanaRpcSource {
    async fn check_balance(
        &self,
        address: &str,
        currency: Currency,
    ) -> Result<BalanceReport, ChainError> {
        if currency != Currency::Sol {
            return Err(ChainError::Unsupported(currency));
        }
        let finalized = self.get_balance(address, "finalized").await?;
        let processed = self.get_balance(address, "processed").await?;
        Ok(BalanceReport {
            confirmed: finalized,
            pending: processed.saturating_sub(finalized),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_balance_result() {
        let v = json!({"jsonrpc":"2.0","result":{"context":{"slot":1},"value":2500000000u64},"id":1});
        assert_eq!(lamports_from(&v).unwrap(), 2_500_000_000);
    }

    #[test]
    fn rpc_errors_surface() {
        let v = json!({"jsonrpc":"2.0","error":{"code":-32602,"message":"Invalid param"},"id":1});
        assert!(matches!(lamports_from(&v), Err(ChainError::Malformed(_))));
    }

    #[tokio::test]
    async fn tokens_are_not_observed() {
        let src = SolanaRpcSource::new("http://127.0.0.1:9");
        assert!(matches!(
            src.check_balance("x", Currency::UsdtSol).await,
            Err(ChainError::Unsupported(Currency::UsdtSol))
        ));
    }
}
