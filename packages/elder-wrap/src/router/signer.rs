//! Build and sign router-chain transactions (SIGN_MODE_DIRECT).

use super::proto::{
    Any, AuthInfo, Coin, Fee, ModeInfo, ModeInfoSingle, MsgSubmitRollTx, PubKey, SignDoc,
    SignerInfo, TxBody, TxRaw, MSG_SUBMIT_ROLL_TX_TYPE_URL, SECP256K1_PUBKEY_TYPE_URL,
    SIGN_MODE_DIRECT,
};
use crate::key_store::{secp, SigningIdentity};
use prost::Message as _;
use secp256k1::Message;
use sha2::{Digest, Sha256};

/// Everything the signature commits to besides the message itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxParams {
    pub chain_id: String,
    pub account_number: u64,
    pub sequence: u64,
    pub gas_limit: u64,
    /// Zero omits the fee coin entirely.
    pub fee_amount: u128,
    pub fee_denom: String,
}

/// Encode and sign `msg`, returning `TxRaw` bytes ready for simulate or broadcast.
///
/// Gas and fee are inside the signed auth info; changing either requires
/// signing again.
pub fn sign_tx(
    identity: &SigningIdentity,
    msg: &MsgSubmitRollTx,
    params: &TxParams,
) -> Result<Vec<u8>, crate::Error> {
    let body_bytes = TxBody {
        messages: vec![Any::pack(MSG_SUBMIT_ROLL_TX_TYPE_URL, msg)],
        memo: String::new(),
        timeout_height: 0,
    }
    .encode_to_vec();

    let amount = if params.fee_amount == 0 {
        Vec::new()
    } else {
        vec![Coin {
            denom: params.fee_denom.clone(),
            amount: params.fee_amount.to_string(),
        }]
    };

    let auth_info_bytes = AuthInfo {
        signer_infos: vec![SignerInfo {
            public_key: Some(Any::pack(
                SECP256K1_PUBKEY_TYPE_URL,
                &PubKey {
                    key: identity.public_key().serialize().to_vec(),
                },
            )),
            mode_info: Some(ModeInfo {
                single: Some(ModeInfoSingle {
                    mode: SIGN_MODE_DIRECT,
                }),
            }),
            sequence: params.sequence,
        }],
        fee: Some(Fee {
            amount,
            gas_limit: params.gas_limit,
            payer: String::new(),
            granter: String::new(),
        }),
    }
    .encode_to_vec();

    let sign_doc = SignDoc {
        body_bytes: body_bytes.clone(),
        auth_info_bytes: auth_info_bytes.clone(),
        chain_id: params.chain_id.clone(),
        account_number: params.account_number,
    };
    let digest = Sha256::digest(sign_doc.encode_to_vec());
    let message = Message::from_digest_slice(&digest)
        .map_err(|e| crate::Error::Submission(format!("sign digest: {e}")))?;
    let signature = secp().sign_ecdsa(&message, identity.secret_key());

    Ok(TxRaw {
        body_bytes,
        auth_info_bytes,
        signatures: vec![signature.serialize_compact().to_vec()],
    }
    .encode_to_vec())
}
