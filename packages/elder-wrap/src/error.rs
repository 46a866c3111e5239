//! Error types for the relay.

use std::fmt;

/// JSON-RPC error codes surfaced to callers.
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const SERVER_ERROR: i64 = -32000;
    /// Submission outcome unknown: the tx may still land.
    pub const PENDING_UNCONFIRMED: i64 = -32002;
}

/// Relay error type.
#[derive(Debug)]
pub enum Error {
    /// Configuration error.
    Config(String),
    /// Chain RPC communication error (rollapp or router chain).
    Rpc(String),
    /// Key store I/O or format error.
    KeyStore(String),
    /// Import of an alias that already exists.
    KeyExists(String),
    /// Lookup or deletion of an unknown alias/address.
    KeyNotFound(String),
    /// Raw transaction could not be decoded.
    MalformedTransaction(String),
    /// Transaction targets a different rollapp chain.
    ChainIdMismatch { expected: u64, got: u64 },
    /// Sender could not be recovered from the signature.
    UnrecoverableSender(String),
    /// Sender is not a managed signing identity.
    UnknownSigner(String),
    /// Transaction nonce differs from the sender's pending nonce.
    NonceMismatch { expected: u64, got: u64 },
    /// Router-chain simulation/signing/broadcast failure.
    Submission(String),
    /// Broadcast accepted but inclusion was not observed in time.
    ConfirmationTimeout { tx_hash: String, attempts: u32 },
    /// Request body is not valid JSON.
    Parse(String),
    /// Batch request contains a submit-class call.
    BatchSubmitUnsupported,
    /// Malformed JSON-RPC call (bad params, missing fields).
    InvalidRequest(String),
    /// Forwarding to the rollapp RPC failed.
    Gateway(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "config error: {msg}"),
            Error::Rpc(msg) => write!(f, "rpc error: {msg}"),
            Error::KeyStore(msg) => write!(f, "key store error: {msg}"),
            Error::KeyExists(alias) => write!(f, "key {alias}: key already exists"),
            Error::KeyNotFound(what) => write!(f, "key {what}: key not found"),
            Error::MalformedTransaction(msg) => write!(f, "malformed transaction: {msg}"),
            Error::ChainIdMismatch { expected, got } => {
                write!(f, "chain id mismatch: expected {expected}, got {got}")
            }
            Error::UnrecoverableSender(msg) => write!(f, "failed to recover sender: {msg}"),
            Error::UnknownSigner(addr) => write!(f, "key not found: {addr}"),
            Error::NonceMismatch { expected, got } => {
                write!(f, "nonce mismatch: expected {expected}, got {got}")
            }
            Error::Submission(msg) => write!(f, "submission failed: {msg}"),
            Error::ConfirmationTimeout { tx_hash, attempts } => write!(
                f,
                "elder tx {tx_hash} not found after {attempts} attempts; query by hash before resubmitting"
            ),
            Error::Parse(msg) => write!(f, "parse error: {msg}"),
            Error::BatchSubmitUnsupported => write!(
                f,
                "batch request contains eth_sendRawTransaction, not supported"
            ),
            Error::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            Error::Gateway(msg) => write!(f, "gateway error: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// JSON-RPC error code for this error.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Error::Parse(_) => codes::PARSE_ERROR,
            Error::InvalidRequest(_) | Error::BatchSubmitUnsupported => codes::INVALID_REQUEST,
            Error::MalformedTransaction(_)
            | Error::ChainIdMismatch { .. }
            | Error::UnrecoverableSender(_)
            | Error::UnknownSigner(_)
            | Error::NonceMismatch { .. } => codes::INVALID_PARAMS,
            Error::ConfirmationTimeout { .. } => codes::PENDING_UNCONFIRMED,
            Error::Config(_)
            | Error::Rpc(_)
            | Error::KeyStore(_)
            | Error::KeyExists(_)
            | Error::KeyNotFound(_)
            | Error::Submission(_)
            | Error::Gateway(_) => codes::SERVER_ERROR,
        }
    }

    /// Whether repeating the same request could succeed without new input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Rpc(_) | Error::Gateway(_))
    }

    /// Verification-stage rejection (the caller's transaction is at fault).
    pub fn is_verification(&self) -> bool {
        matches!(
            self,
            Error::MalformedTransaction(_)
                | Error::ChainIdMismatch { .. }
                | Error::UnrecoverableSender(_)
                | Error::UnknownSigner(_)
                | Error::NonceMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_errors_are_terminal() {
        let errs = [
            Error::MalformedTransaction("bad rlp".into()),
            Error::ChainIdMismatch {
                expected: 1,
                got: 2,
            },
            Error::UnrecoverableSender("bad sig".into()),
            Error::UnknownSigner("0xabc".into()),
            Error::NonceMismatch {
                expected: 5,
                got: 6,
            },
        ];
        for e in &errs {
            assert!(e.is_verification(), "{e}");
            assert!(!e.is_retryable(), "{e}");
            assert_eq!(e.rpc_code(), codes::INVALID_PARAMS);
        }
    }

    #[test]
    fn test_confirmation_timeout_is_distinct() {
        let e = Error::ConfirmationTimeout {
            tx_hash: "ABCD".into(),
            attempts: 10,
        };
        assert_eq!(e.rpc_code(), codes::PENDING_UNCONFIRMED);
        assert!(!e.is_retryable());
        assert!(e.to_string().contains("ABCD"));
    }

    #[test]
    fn test_display_messages() {
        let e = Error::NonceMismatch {
            expected: 5,
            got: 6,
        };
        assert_eq!(e.to_string(), "nonce mismatch: expected 5, got 6");
        assert_eq!(Error::Parse("eof".into()).rpc_code(), codes::PARSE_ERROR);
        assert!(Error::BatchSubmitUnsupported
            .to_string()
            .contains("eth_sendRawTransaction"));
    }
}
