//! Cross-chain submission: wrap a verified rollapp tx in `MsgSubmitRollTx`,
//! price it, sign, broadcast and wait for inclusion on the router chain.

use crate::key_store::SigningIdentity;
use crate::router::proto::MsgSubmitRollTx;
use crate::router::signer::{sign_tx, TxParams};
use crate::router::{RouterChain, TxConfirmation};
use crate::submit_lock::SubmitGuard;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Gas price, safety multiplier and fee denomination.
#[derive(Debug, Clone)]
pub struct FeeSchedule {
    pub gas_price: Decimal,
    pub gas_adjustment: Decimal,
    pub denom: String,
}

impl FeeSchedule {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            gas_price: config.gas_price,
            gas_adjustment: config.gas_adjustment,
            denom: config.fee_denom.clone(),
        }
    }

    /// `ceil(gas_used × gas_adjustment)`.
    pub fn adjust_gas(&self, gas_used: u64) -> Result<u64, crate::Error> {
        (Decimal::from(gas_used) * self.gas_adjustment)
            .ceil()
            .to_u64()
            .ok_or_else(|| crate::Error::Submission(format!("gas {gas_used} overflows after adjustment")))
    }

    /// `ceil(gas_limit × gas_price)`. Never rounds down.
    pub fn gas_fee(&self, gas_limit: u64) -> Result<u128, crate::Error> {
        (Decimal::from(gas_limit) * self.gas_price)
            .ceil()
            .to_u128()
            .ok_or_else(|| crate::Error::Submission(format!("fee for gas {gas_limit} out of range")))
    }
}

/// Registration floor: fee units per payload byte × payload length.
pub fn floor_fee(min_fee_rate: u64, payload_len: usize) -> u128 {
    u128::from(min_fee_rate).saturating_mul(payload_len as u128)
}

/// A broadcast that was observed in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub router_tx_hash: String,
    pub confirmation: TxConfirmation,
    pub sequence: u64,
    pub gas_limit: u64,
    pub fee: u128,
}

pub struct Pipeline {
    router: Arc<dyn RouterChain>,
    fees: FeeSchedule,
    confirm_interval: Duration,
    confirm_attempts: u32,
}

impl Pipeline {
    pub fn new(router: Arc<dyn RouterChain>, config: &crate::Config) -> Self {
        Self {
            router,
            fees: FeeSchedule::from_config(config),
            confirm_interval: config.confirm_interval(),
            confirm_attempts: config.confirm_attempts.max(1),
        }
    }

    pub fn router(&self) -> &Arc<dyn RouterChain> {
        &self.router
    }

    /// Submit `tx_bytes` for `registration_id` as `identity`.
    ///
    /// `guard` must be the identity's submission lock; the account sequence
    /// read here is only valid while it is held.
    pub async fn submit(
        &self,
        guard: &SubmitGuard,
        identity: &SigningIdentity,
        tx_bytes: &[u8],
        registration_id: u64,
    ) -> Result<SubmitOutcome, crate::Error> {
        if !guard.holds(identity) {
            return Err(crate::Error::Submission(format!(
                "submission lock for {} held, {} required",
                guard.identity_key(),
                identity.router_address()
            )));
        }
        let sender = identity.router_address();

        // Always the chain's value; the guard's hint is only logged.
        let account = self.router.account(sender).await?;
        if let Some(last) = guard.last_sequence() {
            if account.sequence <= last {
                warn!(
                    router_address = sender,
                    sequence = account.sequence,
                    last_used = last,
                    "Router sequence has not advanced since last submission"
                );
            }
        }

        let min_fee_rate = self.router.min_fee_rate(registration_id).await?;
        let floor = floor_fee(min_fee_rate, tx_bytes.len());
        let chain_id = self.router.chain_id().await?;

        let msg = MsgSubmitRollTx {
            sender: sender.to_string(),
            roll_id: registration_id,
            tx_data: tx_bytes.to_vec(),
            acc_num: account.account_number,
        };
        let mut params = TxParams {
            chain_id,
            account_number: account.account_number,
            sequence: account.sequence,
            gas_limit: 0,
            fee_amount: 0,
            fee_denom: self.fees.denom.clone(),
        };

        let gas_used = self
            .router
            .simulate(&sign_tx(identity, &msg, &params)?)
            .await?;
        params.gas_limit = self.fees.adjust_gas(gas_used)?;
        params.fee_amount = floor.max(self.fees.gas_fee(params.gas_limit)?);

        // The simulation signature covered a zero fee; sign the final values.
        let signed = sign_tx(identity, &msg, &params)?;
        debug!(
            router_address = sender,
            sequence = params.sequence,
            gas_used,
            gas_limit = params.gas_limit,
            fee = %params.fee_amount,
            "Router tx priced"
        );

        let result = self.router.broadcast(&signed).await?;
        if result.code != 0 {
            return Err(crate::Error::Submission(format!(
                "broadcast rejected with code {}: {}",
                result.code, result.raw_log
            )));
        }
        guard.record_sequence(params.sequence);
        info!(
            router_address = sender,
            sequence = params.sequence,
            tx_hash = %result.tx_hash,
            registration_id,
            "Router tx broadcast"
        );

        let confirmation = self.await_inclusion(&result.tx_hash).await?;
        if confirmation.code != 0 {
            return Err(crate::Error::Submission(format!(
                "router tx {} failed in block {} with code {}: {}",
                result.tx_hash, confirmation.height, confirmation.code, confirmation.raw_log
            )));
        }
        Ok(SubmitOutcome {
            router_tx_hash: result.tx_hash,
            confirmation,
            sequence: params.sequence,
            gas_limit: params.gas_limit,
            fee: params.fee_amount,
        })
    }

    /// Poll for inclusion. Query errors count as attempts. Never resubmits.
    async fn await_inclusion(&self, tx_hash: &str) -> Result<TxConfirmation, crate::Error> {
        for attempt in 1..=self.confirm_attempts {
            tokio::time::sleep(self.confirm_interval).await;
            match self.router.get_by_hash(tx_hash).await {
                Ok(Some(confirmation)) => {
                    info!(tx_hash, height = confirmation.height, attempt, "Router tx included");
                    return Ok(confirmation);
                }
                Ok(None) => debug!(tx_hash, attempt, "Router tx not yet included"),
                Err(e) => warn!(tx_hash, attempt, error = %e, "Router tx lookup failed"),
            }
        }
        Err(crate::Error::ConfirmationTimeout {
            tx_hash: tx_hash.to_string(),
            attempts: self.confirm_attempts,
        })
    }
}
