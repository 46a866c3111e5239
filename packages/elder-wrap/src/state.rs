//! Shared application state.

use crate::config::Config;
use crate::key_store::KeyRegistry;
use crate::pipeline::Pipeline;
use crate::rollapp::{HttpRollappClient, RollappChain};
use crate::router::{RestRouterClient, RouterChain};
use crate::submit_lock::SubmitLocks;
use crate::verifier::Verifier;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One configured rollapp: its RPC and its router-chain registration.
pub struct RollappRoute {
    pub name: String,
    pub rpc_url: String,
    pub registration_id: u64,
    pub chain: Arc<dyn RollappChain>,
    pub verifier: Verifier,
}

pub struct AppState {
    pub config: Config,
    pub registry: Arc<KeyRegistry>,
    pub locks: SubmitLocks,
    pub pipeline: Pipeline,
    pub rollapps: HashMap<String, RollappRoute>,
    pub start_time: Instant,
    pub request_count: AtomicU64,
}

impl AppState {
    /// Connect to the configured chains and open the key store.
    pub async fn new(config: Config) -> Result<Self, crate::Error> {
        let registry = Arc::new(KeyRegistry::open_from_env(
            &config.key_store_dir,
            &config.bech32_prefix,
        )?);

        let router = Arc::new(RestRouterClient::new(
            &config.elder_endpoint,
            config.request_timeout(),
        )?);
        match router.ping().await {
            Ok(()) => info!(endpoint = %config.elder_endpoint, "Router chain reachable"),
            Err(e) => warn!(endpoint = %config.elder_endpoint, error = %e, "Router chain unreachable at startup"),
        }

        let mut chains: HashMap<String, Arc<dyn RollappChain>> = HashMap::new();
        for (name, rollapp) in &config.rollup_rpcs {
            let client = HttpRollappClient::new(&rollapp.rpc, config.request_timeout())?;
            chains.insert(name.clone(), Arc::new(client));
        }

        Self::from_parts(config, registry, router, chains)
    }

    /// Assemble from already-built collaborators. Every configured rollapp
    /// needs a chain in `chains`.
    pub fn from_parts(
        config: Config,
        registry: Arc<KeyRegistry>,
        router: Arc<dyn RouterChain>,
        mut chains: HashMap<String, Arc<dyn RollappChain>>,
    ) -> Result<Self, crate::Error> {
        let mut rollapps = HashMap::new();
        for (name, rollapp) in &config.rollup_rpcs {
            let chain = chains.remove(name).ok_or_else(|| {
                crate::Error::Config(format!("no rollapp client for {name}"))
            })?;
            info!(
                rollapp = %name,
                rpc = %rollapp.rpc,
                registration_id = rollapp.elder_registration_id,
                "Rollapp route registered"
            );
            rollapps.insert(
                name.clone(),
                RollappRoute {
                    name: name.clone(),
                    rpc_url: rollapp.rpc.clone(),
                    registration_id: rollapp.elder_registration_id,
                    verifier: Verifier::new(Arc::clone(&chain), Arc::clone(&registry)),
                    chain,
                },
            );
        }

        // One lock per known identity up front; later imports get theirs lazily.
        let identities = registry.list()?;
        let locks = SubmitLocks::with_identities(&identities);
        info!(identities = identities.len(), "Submission locks initialized");

        Ok(Self {
            pipeline: Pipeline::new(router, &config),
            config,
            registry,
            locks,
            rollapps,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        })
    }

    pub fn rollapp(&self, name: &str) -> Option<&RollappRoute> {
        self.rollapps.get(name)
    }
}
