//! Elder Wrap: a JSON-RPC front for EVM rollapps that relays signed
//! transactions onto the Elder router chain.
//!
//! `eth_sendRawTransaction` is verified, mapped to a managed identity and
//! submitted as a `MsgSubmitRollTx`, one submission per identity at a time.
//! Every other call is forwarded to the rollapp unchanged.

pub mod config;
pub mod error;
pub mod handlers;
pub mod jsonrpc;
pub mod key_store;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod response;
pub mod rollapp;
pub mod router;
pub mod routes;
pub mod state;
pub mod submit_lock;
pub mod verifier;

#[cfg(test)]
mod fakes;

pub use config::Config;
pub use error::Error;
pub use key_store::{KeyRegistry, SigningIdentity};
pub use routes::create_router;
pub use state::AppState;
