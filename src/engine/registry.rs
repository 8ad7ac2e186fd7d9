//! Agent registration.
//!
//! Issues a fresh API key per registration and derives a deterministic
//! public address from it, so the same key always maps to the same
//! address while two registrations under the same name stay distinct.

use std::sync::Arc;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::store::{MarketStore, NewAgent};
use crate::types::{Agent, EngineError};

pub struct RegistryEngine {
    store: Arc<dyn MarketStore>,
}

impl RegistryEngine {
    pub fn new(store: Arc<dyn MarketStore>) -> Self {
        Self { store }
    }

    /// Register a new agent under `name`. Names are not unique; each call
    /// creates a separate agent with its own credentials.
    pub async fn register_agent(&self, name: &str) -> Result<Agent, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::InvalidArgument(
                "agent_name is required".to_string(),
            ));
        }

        let api_key = Uuid::new_v4().to_string();
        let public_address = derive_public_address(&api_key);

        let agent = self
            .store
            .register_agent(NewAgent {
                agent_name: name.to_string(),
                api_key,
                public_address,
            })
            .await?;

        info!(agent_id = %agent.id, agent_name = name, "Agent registered");
        Ok(agent)
    }
}

/// Derive the public address for an API key: the last 20 bytes of
/// SHA-256(key), hex-encoded with a `0x` prefix.
pub fn derive_public_address(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    let tail = &digest[digest.len() - 20..];
    let mut address = String::with_capacity(42);
    address.push_str("0x");
    for byte in tail {
        address.push_str(&format!("{:02x}", byte));
    }
    address
}
