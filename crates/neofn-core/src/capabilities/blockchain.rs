//! Blockchain capability - contract read and write invocations
//!
//! The capability validates and forwards; a [`BlockchainClient`] does the
//! work. [`SimulatedBlockchain`] is the in-process default: reads return a
//! fixed result and writes return a deterministic transaction hash.

use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use super::{CapabilityError, CapabilityOp, ServiceError};

/// Backend for blockchain invocations
pub trait BlockchainClient: Send + Sync {
    /// Invoke a read-only contract operation and return its result
    fn invoke_read(
        &self,
        script_hash: &str,
        operation: &str,
        args: &[JsonValue],
    ) -> Result<JsonValue, ServiceError>;

    /// Submit a state-changing invocation and return its transaction hash
    fn invoke_write(
        &self,
        script_hash: &str,
        operation: &str,
        args: &[JsonValue],
    ) -> Result<String, ServiceError>;
}

/// In-process stand-in for a blockchain node
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedBlockchain;

impl SimulatedBlockchain {
    /// `0x` + SHA-256 over the canonical JSON of `[script_hash, operation, args]`
    pub fn transaction_hash(script_hash: &str, operation: &str, args: &[JsonValue]) -> String {
        let canonical = serde_json::json!([script_hash, operation, args]).to_string();
        let hash = Sha256::digest(canonical.as_bytes());
        format!("0x{:x}", hash)
    }
}

impl BlockchainClient for SimulatedBlockchain {
    fn invoke_read(
        &self,
        _script_hash: &str,
        _operation: &str,
        _args: &[JsonValue],
    ) -> Result<JsonValue, ServiceError> {
        Ok(serde_json::json!({ "result": "simulated-result" }))
    }

    fn invoke_write(
        &self,
        script_hash: &str,
        operation: &str,
        args: &[JsonValue],
    ) -> Result<String, ServiceError> {
        Ok(Self::transaction_hash(script_hash, operation, args))
    }
}

pub struct BlockchainCapability<'a> {
    client: &'a dyn BlockchainClient,
}

impl<'a> BlockchainCapability<'a> {
    pub fn new(client: &'a dyn BlockchainClient) -> Self {
        BlockchainCapability { client }
    }

    pub fn invoke_read(
        &self,
        script_hash: &str,
        operation: &str,
        args: &[JsonValue],
    ) -> Result<JsonValue, CapabilityError> {
        tracing::debug!(script_hash, operation, "blockchain invoke_read");
        self.client
            .invoke_read(script_hash, operation, args)
            .map_err(|e| CapabilityError::service(CapabilityOp::BlockchainInvokeRead, e))
    }

    pub fn invoke_write(
        &self,
        script_hash: &str,
        operation: &str,
        args: &[JsonValue],
    ) -> Result<String, CapabilityError> {
        tracing::debug!(script_hash, operation, "blockchain invoke_write");
        self.client
            .invoke_write(script_hash, operation, args)
            .map_err(|e| CapabilityError::service(CapabilityOp::BlockchainInvokeWrite, e))
    }
}
