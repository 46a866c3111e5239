//! In-memory chain doubles for unit tests.

use crate::rollapp::{ForwardedResponse, RollappChain};
use crate::router::proto::{AuthInfo, MsgSubmitRollTx, TxBody, TxRaw};
use crate::router::{AccountInfo, BroadcastResult, RouterChain, TxConfirmation};
use alloy_consensus::{SignableTransaction, TxEip1559, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, PrimitiveSignature, TxKind, U256};
use async_trait::async_trait;
use axum::body::Bytes;
use prost::Message as _;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub(crate) struct FakeRollapp {
    pub chain_id: u64,
    pub nonces: Mutex<HashMap<Address, u64>>,
    pub chain_id_queries: AtomicU32,
    pub nonce_queries: AtomicU32,
    pub forwarded: Mutex<Vec<Bytes>>,
    pub fail_forward: bool,
}

impl FakeRollapp {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            nonces: Mutex::new(HashMap::new()),
            chain_id_queries: AtomicU32::new(0),
            nonce_queries: AtomicU32::new(0),
            forwarded: Mutex::new(Vec::new()),
            fail_forward: false,
        }
    }

    pub fn with_nonce(self, address: Address, nonce: u64) -> Self {
        self.nonces.lock().unwrap().insert(address, nonce);
        self
    }
}

#[async_trait]
impl RollappChain for FakeRollapp {
    async fn chain_id(&self) -> Result<u64, crate::Error> {
        self.chain_id_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain_id)
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, crate::Error> {
        self.nonce_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.nonces.lock().unwrap().get(&address).copied().unwrap_or(0))
    }

    async fn forward_raw(&self, body: Bytes) -> Result<ForwardedResponse, crate::Error> {
        if self.fail_forward {
            return Err(crate::Error::Gateway("connection refused".into()));
        }
        self.forwarded.lock().unwrap().push(body.clone());
        Ok(ForwardedResponse {
            status: 200,
            body: Bytes::from_static(br#"{"jsonrpc":"2.0","id":1,"result":"0x10"}"#),
        })
    }
}

/// Router chain double. Successful broadcasts advance the sender's
/// sequence; a broadcast with a stale sequence gets code 32.
pub(crate) struct FakeRouter {
    pub chain_id: String,
    pub accounts: Mutex<HashMap<String, AccountInfo>>,
    pub min_fee_rate: u64,
    pub gas_used: u64,
    /// Forced broadcast result code; 0 = accept.
    pub broadcast_code: AtomicU32,
    /// Polls before a broadcast tx shows up; `u32::MAX` = never.
    pub confirm_after: u32,
    pub simulate_delay: Duration,
    pub simulations: AtomicU32,
    pub polls: AtomicU32,
    /// (sequence, gas_limit, fee amount) of every accepted broadcast.
    pub broadcasts: Mutex<Vec<(u64, u64, String)>>,
    next_hash: AtomicU64,
}

impl FakeRouter {
    pub fn new() -> Self {
        Self {
            chain_id: "elder_122-1".into(),
            accounts: Mutex::new(HashMap::new()),
            min_fee_rate: 10,
            gas_used: 50_000,
            broadcast_code: AtomicU32::new(0),
            confirm_after: 0,
            simulate_delay: Duration::ZERO,
            simulations: AtomicU32::new(0),
            polls: AtomicU32::new(0),
            broadcasts: Mutex::new(Vec::new()),
            next_hash: AtomicU64::new(1),
        }
    }

    pub fn with_account(self, address: &str, account_number: u64, sequence: u64) -> Self {
        self.accounts.lock().unwrap().insert(
            address.to_string(),
            AccountInfo {
                account_number,
                sequence,
            },
        );
        self
    }

    pub fn sequences(&self) -> Vec<u64> {
        self.broadcasts.lock().unwrap().iter().map(|b| b.0).collect()
    }
}

/// Sender of the wrapped message plus the signed auth info.
fn decode_tx(tx_bytes: &[u8]) -> (String, AuthInfo) {
    let raw = TxRaw::decode(tx_bytes).unwrap();
    let body = TxBody::decode(raw.body_bytes.as_slice()).unwrap();
    let msg = MsgSubmitRollTx::decode(body.messages[0].value.as_slice()).unwrap();
    let auth = AuthInfo::decode(raw.auth_info_bytes.as_slice()).unwrap();
    (msg.sender, auth)
}

#[async_trait]
impl RouterChain for FakeRouter {
    async fn chain_id(&self) -> Result<String, crate::Error> {
        Ok(self.chain_id.clone())
    }

    async fn account(&self, address: &str) -> Result<AccountInfo, crate::Error> {
        self.accounts
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .ok_or_else(|| crate::Error::Submission(format!("router account {address} not found")))
    }

    async fn min_fee_rate(&self, _registration_id: u64) -> Result<u64, crate::Error> {
        Ok(self.min_fee_rate)
    }

    async fn simulate(&self, _tx_bytes: &[u8]) -> Result<u64, crate::Error> {
        self.simulations.fetch_add(1, Ordering::SeqCst);
        if !self.simulate_delay.is_zero() {
            tokio::time::sleep(self.simulate_delay).await;
        }
        Ok(self.gas_used)
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> Result<BroadcastResult, crate::Error> {
        let forced = self.broadcast_code.load(Ordering::SeqCst);
        let hash = format!("{:064X}", self.next_hash.fetch_add(1, Ordering::SeqCst));
        if forced != 0 {
            return Ok(BroadcastResult {
                tx_hash: hash,
                code: forced,
                raw_log: "insufficient fee".into(),
            });
        }

        let (sender, auth) = decode_tx(tx_bytes);
        let seq = auth.signer_infos[0].sequence;
        let fee = auth.fee.unwrap_or_default();
        let mut accounts = self.accounts.lock().unwrap();
        match accounts.get_mut(&sender) {
            Some(account) if account.sequence == seq => {
                account.sequence += 1;
                self.broadcasts.lock().unwrap().push((
                    seq,
                    fee.gas_limit,
                    fee.amount.first().map(|c| c.amount.clone()).unwrap_or_default(),
                ));
                Ok(BroadcastResult {
                    tx_hash: hash,
                    code: 0,
                    raw_log: String::new(),
                })
            }
            _ => Ok(BroadcastResult {
                tx_hash: hash,
                code: 32,
                raw_log: "account sequence mismatch".into(),
            }),
        }
    }

    async fn get_by_hash(&self, _tx_hash: &str) -> Result<Option<TxConfirmation>, crate::Error> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.confirm_after == u32::MAX || polls <= self.confirm_after {
            return Ok(None);
        }
        Ok(Some(TxConfirmation {
            height: 100,
            code: 0,
            raw_log: String::new(),
        }))
    }
}

pub(crate) fn sign_hash(key_hex: &str, hash: alloy_primitives::B256) -> PrimitiveSignature {
    let sk = crate::key_store::parse_secret_key(key_hex).unwrap();
    let msg = secp256k1::Message::from_digest_slice(hash.as_slice()).unwrap();
    let (recid, compact) = crate::key_store::secp()
        .sign_ecdsa_recoverable(&msg, &sk)
        .serialize_compact();
    PrimitiveSignature::new(
        U256::from_be_slice(&compact[..32]),
        U256::from_be_slice(&compact[32..]),
        recid.to_i32() == 1,
    )
}

/// Signed EIP-1559 envelope bytes.
pub(crate) fn sign_eip1559(key_hex: &str, chain_id: u64, nonce: u64) -> Vec<u8> {
    let tx = TxEip1559 {
        chain_id,
        nonce,
        gas_limit: 21_000,
        max_fee_per_gas: 2_000_000_000,
        max_priority_fee_per_gas: 1_000_000_000,
        to: TxKind::Call(Address::repeat_byte(0x11)),
        value: U256::from(1u64),
        ..Default::default()
    };
    let sig = sign_hash(key_hex, tx.signature_hash());
    TxEnvelope::from(tx.into_signed(sig)).encoded_2718()
}

/// Signed legacy envelope bytes; `None` = pre-EIP-155 (no chain id).
pub(crate) fn sign_legacy(key_hex: &str, chain_id: Option<u64>, nonce: u64) -> Vec<u8> {
    let tx = TxLegacy {
        chain_id,
        nonce,
        gas_price: 1_000_000_000,
        gas_limit: 21_000,
        to: TxKind::Call(Address::repeat_byte(0x22)),
        value: U256::from(1u64),
        ..Default::default()
    };
    let sig = sign_hash(key_hex, tx.signature_hash());
    TxEnvelope::from(tx.into_signed(sig)).encoded_2718()
}
