//! Ethereum JSON-RPC access.
//!
//! [`EthRpc`] is the narrow set of node calls the submitter needs. [`HttpRpc`]
//! implements it over HTTP; tests substitute an in-memory node.

use std::{future::Future, time::Duration};

use alloy_core::primitives::{Address, B256, Bytes, U64, U128, U256};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC error code used by most providers for rate limiting.
const LIMIT_EXCEEDED: i64 = -32005;

/// Failure of a single JSON-RPC call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    /// The request never produced a JSON-RPC response.
    #[error("failed to send {method} request: {reason}")]
    Transport { method: String, reason: String },

    /// The node answered with a JSON-RPC error object.
    #[error("{method} failed with code {code}: {message}")]
    Response {
        method: String,
        code: i64,
        message: String,
    },

    /// The response could not be decoded into the expected type.
    #[error("failed to decode {method} response: {reason}")]
    Decode { method: String, reason: String },
}

impl RpcError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Response { code, .. } => *code == LIMIT_EXCEEDED,
            Self::Decode { .. } => false,
        }
    }
}

/// Parameters of an `eth_estimateGas` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub from: Address,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

/// A log entry of a transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcLog {
    pub address: Address,
    #[serde(default)]
    pub topics: Vec<B256>,
    #[serde(default)]
    pub data: Bytes,
}

/// A transaction receipt as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    /// `0x1` on success, `0x0` on revert. Absent on pre-Byzantium chains.
    #[serde(default)]
    pub status: Option<U64>,
    pub block_number: U64,
    pub gas_used: U64,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

/// The node calls needed to sign, broadcast and confirm transactions.
pub trait EthRpc: Send + Sync {
    fn chain_id(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// Nonce of `address`, counting pending transactions.
    fn transaction_count(&self, address: Address)
    -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn estimate_gas(&self, request: &CallRequest)
    -> impl Future<Output = Result<u64, RpcError>> + Send;

    fn gas_price(&self) -> impl Future<Output = Result<u128, RpcError>> + Send;

    /// Broadcast a signed transaction, returning its hash.
    fn send_raw_transaction(&self, raw: &Bytes)
    -> impl Future<Output = Result<B256, RpcError>> + Send;

    /// The receipt of a mined transaction, `None` while it is pending or unknown.
    fn transaction_receipt(
        &self,
        hash: B256,
    ) -> impl Future<Output = Result<Option<RpcReceipt>, RpcError>> + Send;

    fn block_number(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;
}

/// [`EthRpc`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRpc {
    client: reqwest::Client,
    url: Url,
}

impl HttpRpc {
    pub fn new(url: Url) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| RpcError::Transport {
                method: "connect".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Make a JSON-RPC call and deserialize the result.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, RpcError> {
        tracing::trace!(method, "Sending JSON-RPC request");

        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": 1
            }))
            .send()
            .await
            .map_err(|e| RpcError::Transport {
                method: method.to_string(),
                reason: e.to_string(),
            })?;

        let envelope: Value = response.json().await.map_err(|e| RpcError::Transport {
            method: method.to_string(),
            reason: format!("unreadable response body: {e}"),
        })?;

        decode_response(method, envelope)
    }
}

/// Extract the `result` of a JSON-RPC response envelope.
fn decode_response<T: DeserializeOwned>(method: &str, envelope: Value) -> Result<T, RpcError> {
    if let Some(error) = envelope.get("error") {
        return Err(RpcError::Response {
            method: method.to_string(),
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        });
    }

    let Some(result) = envelope.get("result") else {
        return Err(RpcError::Decode {
            method: method.to_string(),
            reason: "no result in response".to_string(),
        });
    };

    serde_json::from_value(result.clone()).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

fn to_value<T: Serialize>(method: &str, value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

impl EthRpc for HttpRpc {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        let id: U64 = self.call("eth_chainId", vec![]).await?;
        Ok(id.to())
    }

    async fn transaction_count(&self, address: Address) -> Result<u64, RpcError> {
        let method = "eth_getTransactionCount";
        let params = vec![to_value(method, address)?, Value::from("pending")];
        let count: U64 = self.call(method, params).await?;
        Ok(count.to())
    }

    async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, RpcError> {
        let method = "eth_estimateGas";
        let gas: U64 = self.call(method, vec![to_value(method, request)?]).await?;
        Ok(gas.to())
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        let price: U128 = self.call("eth_gasPrice", vec![]).await?;
        Ok(price.to())
    }

    async fn send_raw_transaction(&self, raw: &Bytes) -> Result<B256, RpcError> {
        let method = "eth_sendRawTransaction";
        self.call(method, vec![to_value(method, raw)?]).await
    }

    async fn transaction_receipt(&self, hash: B256) -> Result<Option<RpcReceipt>, RpcError> {
        let method = "eth_getTransactionReceipt";
        self.call(method, vec![to_value(method, hash)?]).await
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let number: U64 = self.call("eth_blockNumber", vec![]).await?;
        Ok(number.to())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_result() {
        let number: U64 = decode_response(
            "eth_blockNumber",
            json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1b4" }),
        )
        .unwrap();
        assert_eq!(number.to::<u64>(), 436);
    }

    #[test]
    fn test_decode_error_object() {
        let err = decode_response::<B256>(
            "eth_sendRawTransaction",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "nonce too low" }
            }),
        )
        .unwrap_err();

        assert_eq!(
            err,
            RpcError::Response {
                method: "eth_sendRawTransaction".to_string(),
                code: -32000,
                message: "nonce too low".to_string(),
            }
        );
        assert!(!err.is_transient(), "A node rejection must not be retried");
    }

    #[test]
    fn test_decode_missing_result() {
        let err = decode_response::<U64>("eth_chainId", json!({ "jsonrpc": "2.0", "id": 1 }))
            .unwrap_err();
        assert!(matches!(err, RpcError::Decode { .. }));
    }

    #[test]
    fn test_decode_pending_receipt_is_none() {
        let receipt: Option<RpcReceipt> = decode_response(
            "eth_getTransactionReceipt",
            json!({ "jsonrpc": "2.0", "id": 1, "result": null }),
        )
        .unwrap();
        assert!(receipt.is_none());
    }

    #[test]
    fn test_decode_contract_creation_receipt() {
        let receipt: Option<RpcReceipt> = decode_response(
            "eth_getTransactionReceipt",
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": {
                    "transactionHash": "0x2a4c2f2b4f3b6c1d2e0e37e43d0f1b6f8d1e4f5a6b7c8d9e0f1a2b3c4d5e6f70",
                    "blockNumber": "0x1c9c380",
                    "gasUsed": "0x2dc6c0",
                    "status": "0x1",
                    "contractAddress": "0x5d8b4c2554aeb7e86f387b4d6c00ac33499ed01f",
                    "logs": [{
                        "address": "0x5d8b4c2554aeb7e86f387b4d6c00ac33499ed01f",
                        "topics": ["0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"],
                        "data": "0x"
                    }]
                }
            }),
        )
        .unwrap();

        let receipt = receipt.expect("receipt should be present");
        assert_eq!(receipt.status, Some(U64::from(1)));
        assert_eq!(receipt.block_number.to::<u64>(), 30_000_000);
        assert_eq!(receipt.gas_used.to::<u64>(), 3_000_000);
        assert_eq!(receipt.logs.len(), 1);
        assert_eq!(
            receipt.contract_address,
            Some("0x5d8b4c2554aeb7e86f387b4d6c00ac33499ed01f".parse().unwrap())
        );
    }

    #[test]
    fn test_transient_classification() {
        let transport = RpcError::Transport {
            method: "eth_gasPrice".to_string(),
            reason: "connection reset".to_string(),
        };
        let limited = RpcError::Response {
            method: "eth_gasPrice".to_string(),
            code: LIMIT_EXCEEDED,
            message: "rate limited".to_string(),
        };
        let decode = RpcError::Decode {
            method: "eth_gasPrice".to_string(),
            reason: "invalid hex".to_string(),
        };

        assert!(transport.is_transient());
        assert!(limited.is_transient());
        assert!(!decode.is_transient());
    }

    #[test]
    fn test_call_request_omits_missing_recipient() {
        let request = CallRequest {
            from: Address::with_last_byte(1),
            to: None,
            data: Bytes::from_static(&[0x60, 0x80]),
            value: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("to").is_none(), "contract creation has no recipient");
        assert_eq!(value["data"], "0x6080");
    }
}
