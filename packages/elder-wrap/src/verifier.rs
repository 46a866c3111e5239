//! Rollapp transaction verification.
//!
//! Decode, check chain id, recover the sender, map it to a managed identity
//! and check the nonce. Read-only: the only side effects are the chain id
//! and nonce queries.

use crate::key_store::{secp, KeyRegistry, SigningIdentity};
use crate::rollapp::RollappChain;
use alloy_consensus::{SignableTransaction, Signed, Transaction, TxEnvelope};
use alloy_eips::eip2718::Decodable2718;
use alloy_primitives::{keccak256, Address, PrimitiveSignature, B256, U256};
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::Message;
use std::sync::Arc;
use tracing::debug;

/// A decoded, signature-checked rollapp transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTransaction {
    /// keccak256 of the raw envelope; the hash EVM clients expect back.
    pub hash: B256,
    /// 0 for an unprotected legacy transaction.
    pub chain_id: u64,
    pub nonce: u64,
    pub sender: Address,
    /// Signed envelope bytes, relayed unchanged.
    pub raw: Vec<u8>,
}

/// Output of decoding, before any chain query.
struct Decoded {
    chain_id: u64,
    nonce: u64,
    signature_hash: B256,
    signature: PrimitiveSignature,
}

impl Decoded {
    fn from_signed<T: Transaction + SignableTransaction<PrimitiveSignature>>(
        signed: &Signed<T>,
    ) -> Self {
        Self {
            chain_id: signed.tx().chain_id().unwrap_or(0),
            nonce: signed.tx().nonce(),
            signature_hash: signed.signature_hash(),
            signature: *signed.signature(),
        }
    }
}

/// secp256k1 curve order halved; larger `s` values are malleated (EIP-2).
const SECP256K1N_HALF: [u8; 32] = [
    0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0x5d, 0x57, 0x6e, 0x73, 0x57, 0xa4, 0x50, 0x1d, 0xdf, 0xe9, 0x2f, 0x46, 0x68, 0x1b, 0x20, 0xa0,
];

pub struct Verifier {
    rollapp: Arc<dyn RollappChain>,
    registry: Arc<KeyRegistry>,
}

impl Verifier {
    pub fn new(rollapp: Arc<dyn RollappChain>, registry: Arc<KeyRegistry>) -> Self {
        Self { rollapp, registry }
    }

    /// Verify a hex-encoded signed transaction (`0x` optional).
    pub async fn verify(
        &self,
        raw_tx_hex: &str,
    ) -> Result<(ParsedTransaction, SigningIdentity), crate::Error> {
        let raw = decode_hex(raw_tx_hex)?;
        let decoded = decode_envelope(&raw)?;

        let expected = self.rollapp.chain_id().await?;
        if decoded.chain_id != expected {
            return Err(crate::Error::ChainIdMismatch {
                expected,
                got: decoded.chain_id,
            });
        }

        let sender = recover_sender(decoded.signature_hash, &decoded.signature)?;

        let registry = self.registry.clone();
        let identity = tokio::task::spawn_blocking(move || registry.find_by_rollapp_address(&sender))
            .await
            .map_err(|e| crate::Error::KeyStore(format!("Key lookup task failed: {e}")))??
            .ok_or_else(|| crate::Error::UnknownSigner(sender.to_string()))?;

        let pending = self.rollapp.pending_nonce(sender).await?;
        if decoded.nonce != pending {
            return Err(crate::Error::NonceMismatch {
                expected: pending,
                got: decoded.nonce,
            });
        }

        debug!(
            %sender,
            nonce = decoded.nonce,
            alias = identity.alias(),
            "Rollapp tx verified"
        );
        Ok((
            ParsedTransaction {
                hash: keccak256(&raw),
                chain_id: decoded.chain_id,
                nonce: decoded.nonce,
                sender,
                raw,
            },
            identity,
        ))
    }
}

fn decode_hex(raw_tx_hex: &str) -> Result<Vec<u8>, crate::Error> {
    let trimmed = raw_tx_hex.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() {
        return Err(crate::Error::MalformedTransaction("empty transaction".into()));
    }
    hex::decode(digits).map_err(|e| crate::Error::MalformedTransaction(format!("invalid hex: {e}")))
}

/// Decode an EIP-2718 envelope (legacy, 2930 or 1559).
fn decode_envelope(raw: &[u8]) -> Result<Decoded, crate::Error> {
    let mut buf = raw;
    let envelope = TxEnvelope::decode_2718(&mut buf)
        .map_err(|e| crate::Error::MalformedTransaction(e.to_string()))?;
    if !buf.is_empty() {
        return Err(crate::Error::MalformedTransaction(format!(
            "{} trailing bytes after envelope",
            buf.len()
        )));
    }
    match &envelope {
        TxEnvelope::Legacy(signed) => Ok(Decoded::from_signed(signed)),
        TxEnvelope::Eip2930(signed) => Ok(Decoded::from_signed(signed)),
        TxEnvelope::Eip1559(signed) => Ok(Decoded::from_signed(signed)),
        other => Err(crate::Error::MalformedTransaction(format!(
            "unsupported transaction type {}",
            other.tx_type() as u8
        ))),
    }
}

/// secp256k1 public-key recovery, then keccak256 of the uncompressed key.
/// Only low-`s` signatures are accepted.
pub fn recover_sender(
    signature_hash: B256,
    signature: &PrimitiveSignature,
) -> Result<Address, crate::Error> {
    if signature.s() > U256::from_be_bytes(SECP256K1N_HALF) {
        return Err(crate::Error::UnrecoverableSender(
            "signature s value is not canonical".into(),
        ));
    }
    let unrecoverable = |e: secp256k1::Error| crate::Error::UnrecoverableSender(e.to_string());

    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r().to_be_bytes::<32>());
    compact[32..].copy_from_slice(&signature.s().to_be_bytes::<32>());

    let recid = RecoveryId::from_i32(i32::from(signature.v())).map_err(unrecoverable)?;
    let recoverable = RecoverableSignature::from_compact(&compact, recid).map_err(unrecoverable)?;
    let msg = Message::from_digest_slice(signature_hash.as_slice()).map_err(unrecoverable)?;
    let pubkey = secp()
        .recover_ecdsa(&msg, &recoverable)
        .map_err(unrecoverable)?;
    Ok(crate::key_store::rollapp_address(&pubkey))
}
