//! Relay configuration.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `ELDER_WRAP_ELDER_ENDPOINT`.
pub const ENV_PREFIX: &str = "ELDER_WRAP";

/// Per-rollapp routing: its native RPC and its Elder registration.
#[derive(Debug, Clone, Deserialize)]
pub struct RollappConfig {
    #[serde(default)]
    pub rpc: String,

    #[serde(default)]
    pub elder_registration_id: u64,
}

impl RollappConfig {
    fn validate(&self, name: &str) -> Result<(), crate::Error> {
        if self.rpc.is_empty() {
            return Err(crate::Error::Config(format!("rollapp {name}: rpc is required")));
        }
        if self.elder_registration_id == 0 {
            return Err(crate::Error::Config(format!(
                "rollapp {name}: elder_registration_id can't be zero"
            )));
        }
        Ok(())
    }
}

/// Configuration for the relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Elder (router chain) REST endpoint.
    #[serde(default)]
    pub elder_endpoint: String,

    #[serde(default = "defaults::bind_host")]
    pub bind_host: String,

    #[serde(default = "defaults::port")]
    pub elder_wrap_port: u16,

    #[serde(default)]
    pub rollup_rpcs: BTreeMap<String, RollappConfig>,

    #[serde(default)]
    pub key_store_dir: String,

    #[serde(default = "defaults::log_level")]
    pub log_level: String,

    /// Fee units per gas unit.
    #[serde(default = "defaults::gas_price")]
    pub gas_price: Decimal,

    /// Multiplier applied to simulated gas.
    #[serde(default = "defaults::gas_adjustment")]
    pub gas_adjustment: Decimal,

    #[serde(default = "defaults::fee_denom")]
    pub fee_denom: String,

    #[serde(default = "defaults::bech32_prefix")]
    pub bech32_prefix: String,

    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "defaults::confirm_interval_ms")]
    pub confirm_interval_ms: u64,

    #[serde(default = "defaults::confirm_attempts")]
    pub confirm_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elder_endpoint: String::new(),
            bind_host: defaults::bind_host(),
            elder_wrap_port: defaults::port(),
            rollup_rpcs: BTreeMap::new(),
            key_store_dir: String::new(),
            log_level: defaults::log_level(),
            gas_price: defaults::gas_price(),
            gas_adjustment: defaults::gas_adjustment(),
            fee_denom: defaults::fee_denom(),
            bech32_prefix: defaults::bech32_prefix(),
            request_timeout_secs: defaults::request_timeout_secs(),
            confirm_interval_ms: defaults::confirm_interval_ms(),
            confirm_attempts: defaults::confirm_attempts(),
        }
    }
}

impl Config {
    /// Load from `path` (any format the `config` crate recognizes) with
    /// `ELDER_WRAP_*` environment overrides. Does not validate.
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Check everything the server needs. Keystore commands only need
    /// [`Config::validate_key_store`].
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.elder_endpoint.is_empty() {
            return Err(crate::Error::Config("elder_endpoint is required".into()));
        }
        if self.rollup_rpcs.is_empty() {
            return Err(crate::Error::Config("rollup_rpcs is required".into()));
        }
        for (name, rollapp) in &self.rollup_rpcs {
            rollapp.validate(name)?;
        }
        self.validate_key_store()?;
        if self.gas_adjustment < Decimal::ONE {
            return Err(crate::Error::Config(format!(
                "gas_adjustment must be >= 1.0, got {}",
                self.gas_adjustment
            )));
        }
        if self.gas_price.is_sign_negative() {
            return Err(crate::Error::Config("gas_price can't be negative".into()));
        }
        if self.confirm_attempts == 0 {
            return Err(crate::Error::Config("confirm_attempts must be > 0".into()));
        }
        Ok(())
    }

    pub fn validate_key_store(&self) -> Result<(), crate::Error> {
        if self.key_store_dir.is_empty() {
            return Err(crate::Error::Config("key_store_dir is required".into()));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.elder_wrap_port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn confirm_interval(&self) -> Duration {
        Duration::from_millis(self.confirm_interval_ms)
    }

    /// Tracing filter directive for the configured level.
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.as_str() {
            "debug" => "debug",
            "warn" => "warn",
            "error" => "error",
            _ => "info",
        }
    }
}

mod defaults {
    use rust_decimal::Decimal;

    pub fn bind_host() -> String {
        "0.0.0.0".into()
    }

    pub fn port() -> u16 {
        8546
    }

    pub fn log_level() -> String {
        "info".into()
    }

    /// 0.01 micro-units per gas.
    pub fn gas_price() -> Decimal {
        Decimal::new(1, 8)
    }

    pub fn gas_adjustment() -> Decimal {
        Decimal::new(13, 1)
    }

    pub fn fee_denom() -> String {
        "elder".into()
    }

    pub fn bech32_prefix() -> String {
        "elder".into()
    }

    pub fn request_timeout_secs() -> u64 {
        5
    }

    pub fn confirm_interval_ms() -> u64 {
        2_000
    }

    pub fn confirm_attempts() -> u32 {
        10
    }
}
