//! Cosmos REST gateway client for the router chain.

use super::{AccountInfo, BroadcastResult, RouterChain, TxConfirmation};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::metrics::METRICS;

/// gRPC `NotFound`, as reported in REST error bodies.
const GRPC_NOT_FOUND: u32 = 5;

/// Single shared client; `reqwest::Client` pools connections and is safe
/// to use from every identity's submission concurrently.
pub struct RestRouterClient {
    http: reqwest::Client,
    base_url: String,
    chain_id: OnceCell<String>,
}

// --- REST API types ---

/// Cosmos REST encodes 64-bit integers as strings; accept either form.
fn de_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrNum {
        Str(String),
        Num(u64),
    }
    match StrOrNum::deserialize(d)? {
        StrOrNum::Str(s) => s.parse().map_err(serde::de::Error::custom),
        StrOrNum::Num(n) => Ok(n),
    }
}

fn de_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let v = de_u64(d)?;
    u32::try_from(v).map_err(serde::de::Error::custom)
}

#[derive(Deserialize)]
struct NodeInfoResponse {
    default_node_info: NodeInfo,
}

#[derive(Deserialize)]
struct NodeInfo {
    network: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    account: RawAccount,
}

/// `BaseAccount`, or a wrapper type carrying one under `base_account`.
#[derive(Deserialize)]
struct RawAccount {
    #[serde(default, deserialize_with = "de_u64")]
    account_number: u64,
    #[serde(default, deserialize_with = "de_u64")]
    sequence: u64,
    #[serde(default)]
    base_account: Option<Box<RawAccount>>,
}

impl RawAccount {
    fn into_info(self) -> AccountInfo {
        match self.base_account {
            Some(base) => base.into_info(),
            None => AccountInfo {
                account_number: self.account_number,
                sequence: self.sequence,
            },
        }
    }
}

#[derive(Deserialize)]
struct RollResponse {
    roll: Roll,
}

#[derive(Deserialize)]
struct Roll {
    #[serde(default, deserialize_with = "de_u64")]
    min_tx_fees: u64,
}

#[derive(Deserialize)]
struct SimulateResponse {
    gas_info: GasInfo,
}

#[derive(Deserialize)]
struct GasInfo {
    #[serde(deserialize_with = "de_u64")]
    gas_used: u64,
}

#[derive(Deserialize)]
struct TxResponseEnvelope {
    tx_response: TxResponse,
}

#[derive(Deserialize)]
struct TxResponse {
    #[serde(default)]
    txhash: String,
    #[serde(default, deserialize_with = "de_u64")]
    height: u64,
    #[serde(default, deserialize_with = "de_u32")]
    code: u32,
    #[serde(default)]
    raw_log: String,
}

/// REST error body (`{"code": 5, "message": "..."}`).
#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default, deserialize_with = "de_u32")]
    code: u32,
    #[serde(default)]
    message: String,
}

fn error_body(text: &str) -> Option<ErrorBody> {
    serde_json::from_str(text).ok()
}

impl RestRouterClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, crate::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| crate::Error::Config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_id: OnceCell::new(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, what: &str, path: &str) -> Result<T, crate::Error> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| rpc_error(what, e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(rpc_error(what, format!("HTTP {status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| rpc_error(what, format!("parse error: {e}")))
    }

    /// POST a signed transaction. Chain-side rejections are submission
    /// failures; transport failures are RPC errors.
    async fn post_tx<T: DeserializeOwned>(
        &self,
        what: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, crate::Error> {
        let response = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| rpc_error(what, e))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_body(&text).map(|b| b.message).unwrap_or(text);
            if status.is_server_error() && message.is_empty() {
                return Err(rpc_error(what, format!("HTTP {status}")));
            }
            return Err(crate::Error::Submission(format!("{what} rejected: {message}")));
        }
        response
            .json()
            .await
            .map_err(|e| rpc_error(what, format!("parse error: {e}")))
    }

    async fn fetch_chain_id(&self) -> Result<String, crate::Error> {
        let info: NodeInfoResponse = self
            .get("node_info", "/cosmos/base/tendermint/v1beta1/node_info")
            .await?;
        Ok(info.default_node_info.network)
    }
}

fn rpc_error(what: &str, e: impl std::fmt::Display) -> crate::Error {
    METRICS.chain_rpc_errors.fetch_add(1, Ordering::Relaxed);
    crate::Error::Rpc(format!("router {what} failed: {e}"))
}

#[async_trait]
impl RouterChain for RestRouterClient {
    async fn chain_id(&self) -> Result<String, crate::Error> {
        self.chain_id
            .get_or_try_init(|| self.fetch_chain_id())
            .await
            .cloned()
    }

    async fn account(&self, address: &str) -> Result<AccountInfo, crate::Error> {
        let response = self
            .http
            .get(self.url(&format!("/cosmos/auth/v1beta1/accounts/{address}")))
            .send()
            .await
            .map_err(|e| rpc_error("account", e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(crate::Error::Submission(format!(
                "router account {address} not found (unfunded?)"
            )));
        }
        if !status.is_success() {
            return Err(rpc_error("account", format!("HTTP {status}")));
        }
        let resp: AccountResponse = response
            .json()
            .await
            .map_err(|e| rpc_error("account", format!("parse error: {e}")))?;
        Ok(resp.account.into_info())
    }

    async fn min_fee_rate(&self, registration_id: u64) -> Result<u64, crate::Error> {
        let resp: RollResponse = self
            .get(
                "query_roll",
                &format!("/0xElder/elder/registration/query_roll/{registration_id}"),
            )
            .await?;
        Ok(resp.roll.min_tx_fees)
    }

    async fn simulate(&self, tx_bytes: &[u8]) -> Result<u64, crate::Error> {
        let resp: SimulateResponse = self
            .post_tx(
                "simulate",
                "/cosmos/tx/v1beta1/simulate",
                serde_json::json!({ "tx_bytes": B64.encode(tx_bytes) }),
            )
            .await?;
        Ok(resp.gas_info.gas_used)
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<BroadcastResult, crate::Error> {
        let resp: TxResponseEnvelope = self
            .post_tx(
                "broadcast",
                "/cosmos/tx/v1beta1/txs",
                serde_json::json!({
                    "tx_bytes": B64.encode(tx_bytes),
                    "mode": "BROADCAST_MODE_SYNC",
                }),
            )
            .await?;
        let tx = resp.tx_response;
        debug!(tx_hash = %tx.txhash, code = tx.code, "Router broadcast");
        Ok(BroadcastResult {
            tx_hash: tx.txhash,
            code: tx.code,
            raw_log: tx.raw_log,
        })
    }

    async fn get_by_hash(&self, tx_hash: &str) -> Result<Option<TxConfirmation>, crate::Error> {
        let response = self
            .http
            .get(self.url(&format!("/cosmos/tx/v1beta1/txs/{tx_hash}")))
            .send()
            .await
            .map_err(|e| rpc_error("get_tx", e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = response
            .text()
            .await
            .map_err(|e| rpc_error("get_tx", e))?;
        if !status.is_success() {
            if error_body(&text).is_some_and(|b| b.code == GRPC_NOT_FOUND) {
                return Ok(None);
            }
            return Err(rpc_error("get_tx", format!("HTTP {status}: {text}")));
        }
        parse_confirmation(&text)
    }

    async fn ping(&self) -> Result<(), crate::Error> {
        self.fetch_chain_id().await.map(|_| ())
    }
}

fn parse_confirmation(text: &str) -> Result<Option<TxConfirmation>, crate::Error> {
    let resp: TxResponseEnvelope =
        serde_json::from_str(text).map_err(|e| rpc_error("get_tx", format!("parse error: {e}")))?;
    let tx = resp.tx_response;
    // Height 0 is a mempool entry, not an inclusion.
    if tx.height == 0 {
        return Ok(None);
    }
    Ok(Some(TxConfirmation {
        height: tx.height,
        code: tx.code,
        raw_log: tx.raw_log,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_accepts_strings_and_numbers() {
        let a: AccountResponse = serde_json::from_str(
            r#"{"account":{"@type":"/cosmos.auth.v1beta1.BaseAccount","address":"elder1x","account_number":"12","sequence":"3"}}"#,
        )
        .unwrap();
        assert_eq!(
            a.account.into_info(),
            AccountInfo {
                account_number: 12,
                sequence: 3
            }
        );

        let b: AccountResponse =
            serde_json::from_str(r#"{"account":{"account_number":7,"sequence":0}}"#).unwrap();
        assert_eq!(b.account.into_info().account_number, 7);
    }

    #[test]
    fn test_account_nested_base_account() {
        let a: AccountResponse = serde_json::from_str(
            r#"{"account":{"@type":"/ethermint.types.v1.EthAccount","base_account":{"account_number":"4","sequence":"9"},"code_hash":"0x"}}"#,
        )
        .unwrap();
        assert_eq!(
            a.account.into_info(),
            AccountInfo {
                account_number: 4,
                sequence: 9
            }
        );
    }

    #[test]
    fn test_fresh_account_without_sequence() {
        let a: AccountResponse =
            serde_json::from_str(r#"{"account":{"account_number":"5"}}"#).unwrap();
        assert_eq!(a.account.into_info().sequence, 0);
    }

    #[test]
    fn test_roll_and_simulate_parsing() {
        let roll: RollResponse =
            serde_json::from_str(r#"{"roll":{"id":"1","min_tx_fees":"10"}}"#).unwrap();
        assert_eq!(roll.roll.min_tx_fees, 10);

        let sim: SimulateResponse = serde_json::from_str(
            r#"{"gas_info":{"gas_wanted":"0","gas_used":"50000"},"result":{}}"#,
        )
        .unwrap();
        assert_eq!(sim.gas_info.gas_used, 50_000);
    }

    #[test]
    fn test_broadcast_response_parsing() {
        let r: TxResponseEnvelope = serde_json::from_str(
            r#"{"tx_response":{"height":"0","txhash":"ABCDEF","code":13,"raw_log":"insufficient fee"}}"#,
        )
        .unwrap();
        assert_eq!(r.tx_response.txhash, "ABCDEF");
        assert_eq!(r.tx_response.code, 13);
    }

    #[test]
    fn test_confirmation_parsing() {
        let found = parse_confirmation(
            r#"{"tx":{},"tx_response":{"height":"120","txhash":"AB","code":0,"raw_log":""}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(found.height, 120);
        assert_eq!(found.code, 0);

        let pending =
            parse_confirmation(r#"{"tx_response":{"height":"0","txhash":"AB"}}"#).unwrap();
        assert!(pending.is_none());
    }

    #[test]
    fn test_not_found_error_body() {
        let body = error_body(r#"{"code":5,"message":"tx not found: AB","details":[]}"#).unwrap();
        assert_eq!(body.code, GRPC_NOT_FOUND);
        assert!(error_body("<html>").is_none());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let c = RestRouterClient::new("http://localhost:1317/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            c.url("/cosmos/tx/v1beta1/txs"),
            "http://localhost:1317/cosmos/tx/v1beta1/txs"
        );
    }

    mod over_http {
        use super::*;
        use axum::extract::Path;
        use axum::http::StatusCode;
        use axum::routing::{get, post};
        use axum::{Json, Router};
        use serde_json::{json, Value};

        async fn serve(app: Router) -> RestRouterClient {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            RestRouterClient::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap()
        }

        async fn tx_by_hash(Path(hash): Path<String>) -> (StatusCode, Json<Value>) {
            match hash.as_str() {
                "MISSING" => (StatusCode::NOT_FOUND, Json(json!({}))),
                "CODE5" => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"code": 5, "message": "tx not found: CODE5", "details": []})),
                ),
                "PENDING" => (
                    StatusCode::OK,
                    Json(json!({"tx_response": {"height": "0", "txhash": "PENDING"}})),
                ),
                "FOUND" => (
                    StatusCode::OK,
                    Json(json!({"tx_response": {"height": "77", "txhash": "FOUND", "code": 0, "raw_log": ""}})),
                ),
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"code": 13, "message": "internal"})),
                ),
            }
        }

        async fn account(Path(address): Path<String>) -> (StatusCode, Json<Value>) {
            if address == "elder1known" {
                (
                    StatusCode::OK,
                    Json(json!({"account": {"account_number": "3", "sequence": "8"}})),
                )
            } else {
                (
                    StatusCode::NOT_FOUND,
                    Json(json!({"code": 5, "message": "account not found"})),
                )
            }
        }

        fn router_app() -> Router {
            Router::new()
                .route("/cosmos/tx/v1beta1/txs/{hash}", get(tx_by_hash))
                .route("/cosmos/auth/v1beta1/accounts/{address}", get(account))
                .route(
                    "/cosmos/tx/v1beta1/simulate",
                    post(|| async {
                        (
                            StatusCode::BAD_REQUEST,
                            Json(json!({"code": 11, "message": "out of gas"})),
                        )
                    }),
                )
                .route(
                    "/cosmos/tx/v1beta1/txs",
                    post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
                )
        }

        #[tokio::test]
        async fn test_get_by_hash_not_found_variants() {
            let client = serve(router_app()).await;
            assert_eq!(client.get_by_hash("MISSING").await.unwrap(), None);
            assert_eq!(client.get_by_hash("CODE5").await.unwrap(), None);
            assert_eq!(client.get_by_hash("PENDING").await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_get_by_hash_found() {
            let client = serve(router_app()).await;
            let found = client.get_by_hash("FOUND").await.unwrap().unwrap();
            assert_eq!(found.height, 77);
            assert_eq!(found.code, 0);
        }

        #[tokio::test]
        async fn test_get_by_hash_server_error_is_rpc() {
            let client = serve(router_app()).await;
            let err = client.get_by_hash("BROKEN").await.unwrap_err();
            assert!(matches!(err, crate::Error::Rpc(_)), "{err}");
        }

        #[tokio::test]
        async fn test_rejected_simulation_is_submission_error() {
            let client = serve(router_app()).await;
            match client.simulate(&[1, 2, 3]).await.unwrap_err() {
                crate::Error::Submission(msg) => assert!(msg.contains("out of gas"), "{msg}"),
                other => panic!("unexpected {other}"),
            }
        }

        #[tokio::test]
        async fn test_empty_server_error_on_broadcast_is_rpc() {
            let client = serve(router_app()).await;
            let err = client.broadcast(&[1, 2, 3]).await.unwrap_err();
            assert!(matches!(err, crate::Error::Rpc(_)), "{err}");
        }

        #[tokio::test]
        async fn test_account_lookup() {
            let client = serve(router_app()).await;
            assert_eq!(
                client.account("elder1known").await.unwrap(),
                AccountInfo {
                    account_number: 3,
                    sequence: 8
                }
            );
            let err = client.account("elder1unfunded").await.unwrap_err();
            assert!(matches!(err, crate::Error::Submission(_)), "{err}");
        }

        #[tokio::test]
        async fn test_unreachable_node_is_rpc() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);
            let client =
                RestRouterClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
            assert!(matches!(client.ping().await, Err(crate::Error::Rpc(_))));
        }
    }
}
