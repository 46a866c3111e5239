//! Signing identities and their two address encodings.

use alloy_primitives::{keccak256, Address};
use ripemd::Ripemd160;
use secp256k1::{All, PublicKey, Secp256k1, SecretKey};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Shared secp256k1 context (signing + verification + recovery).
pub(crate) fn secp() -> &'static Secp256k1<All> {
    static SECP: OnceLock<Secp256k1<All>> = OnceLock::new();
    SECP.get_or_init(Secp256k1::new)
}

/// A managed key plus its rollapp (EVM) and router (bech32) addresses.
///
/// Addresses are derived once at import and stored alongside the key; they
/// are never reassigned independently of it.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningIdentity {
    alias: String,
    rollapp_address: Address,
    router_address: String,
    secret_key: SecretKey,
}

impl SigningIdentity {
    /// Derive both addresses from `secret_key`.
    pub fn derive(
        alias: impl Into<String>,
        secret_key: SecretKey,
        bech32_prefix: &str,
    ) -> Result<Self, crate::Error> {
        let public_key = secret_key.public_key(secp());
        Ok(Self {
            alias: alias.into(),
            rollapp_address: rollapp_address(&public_key),
            router_address: router_address(&public_key, bech32_prefix)?,
            secret_key,
        })
    }

    /// Rebuild from persisted parts without re-deriving.
    pub(crate) fn from_parts(
        alias: String,
        rollapp_address: Address,
        router_address: String,
        secret_key: SecretKey,
    ) -> Self {
        Self {
            alias,
            rollapp_address,
            router_address,
            secret_key,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn rollapp_address(&self) -> Address {
        self.rollapp_address
    }

    pub fn router_address(&self) -> &str {
        &self.router_address
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret_key.public_key(secp())
    }

    pub(crate) fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }
}

impl fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("alias", &self.alias)
            .field("rollapp_address", &self.rollapp_address)
            .field("router_address", &self.router_address)
            .finish_non_exhaustive()
    }
}

/// Parse a hex private key (optional `0x`).
pub fn parse_secret_key(raw: &str) -> Result<SecretKey, crate::Error> {
    let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
        .map_err(|e| crate::Error::KeyStore(format!("failed to decode private key: {e}")))?;
    SecretKey::from_slice(&bytes)
        .map_err(|e| crate::Error::KeyStore(format!("invalid secp256k1 private key: {e}")))
}

/// keccak256 of the uncompressed public key, last 20 bytes.
pub fn rollapp_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

/// bech32(prefix, RIPEMD160(SHA256(compressed public key))).
pub fn router_address(public_key: &PublicKey, prefix: &str) -> Result<String, crate::Error> {
    let sha = Sha256::digest(public_key.serialize());
    let hash160 = Ripemd160::digest(sha);
    let hrp = bech32::Hrp::parse(prefix)
        .map_err(|e| crate::Error::Config(format!("invalid bech32 prefix {prefix}: {e}")))?;
    bech32::encode::<bech32::Bech32>(hrp, hash160.as_slice())
        .map_err(|e| crate::Error::KeyStore(format!("bech32 encoding failed: {e}")))
}
