//! Operator key loading.
//!
//! The operator keypair is stored as a JSON array of 64 bytes (secret key
//! followed by public key), the layout written by the standard keygen tool.

use std::path::PathBuf;

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use thiserror::Error;
use zeroize::Zeroizing;

/// Length of a serialized keypair.
const KEYPAIR_LENGTH: usize = 64;

/// Source of the operator private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Load from environment variable (development).
    EnvVar { var_name: String },
    /// Load from file (production, recommend 0600 permissions).
    File { path: PathBuf },
}

/// Holds the operator keypair.
///
/// Keys are loaded once at startup and never logged.
pub struct KeyManager {
    operator: Keypair,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("operator", &self.operator.pubkey())
            .finish()
    }
}

impl KeyManager {
    /// Load the operator key and optionally verify its address.
    pub fn load(source: &KeySource, expected_address: Option<Pubkey>) -> Result<Self, KeyError> {
        let content = match source {
            KeySource::EnvVar { var_name } => Zeroizing::new(
                std::env::var(var_name).map_err(|_| KeyError::EnvVarNotFound(var_name.clone()))?,
            ),
            KeySource::File { path } => Zeroizing::new(std::fs::read_to_string(path)?),
        };
        Self::from_json(&content, expected_address)
    }

    /// Parse a JSON byte array.
    pub fn from_json(content: &str, expected_address: Option<Pubkey>) -> Result<Self, KeyError> {
        let bytes: Zeroizing<Vec<u8>> = Zeroizing::new(
            serde_json::from_str(content.trim())
                .map_err(|e| KeyError::InvalidFormat(e.to_string()))?,
        );
        Self::from_bytes(&bytes, expected_address)
    }

    pub fn from_bytes(bytes: &[u8], expected_address: Option<Pubkey>) -> Result<Self, KeyError> {
        if bytes.len() != KEYPAIR_LENGTH {
            return Err(KeyError::InvalidFormat(format!(
                "expected {KEYPAIR_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let operator = Keypair::try_from(bytes).map_err(|e| KeyError::InvalidKey(e.to_string()))?;

        if let Some(expected) = expected_address {
            if operator.pubkey() != expected {
                return Err(KeyError::AddressMismatch {
                    expected,
                    actual: operator.pubkey(),
                });
            }
        }

        Ok(Self { operator })
    }

    pub fn from_keypair(operator: Keypair) -> Self {
        Self { operator }
    }

    pub fn operator(&self) -> &Keypair {
        &self.operator
    }

    pub fn address(&self) -> Pubkey {
        self.operator.pubkey()
    }

    pub fn into_keypair(self) -> Keypair {
        self.operator
    }
}

/// Key management errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Invalid keypair format: {0}")]
    InvalidFormat(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Address mismatch: expected {expected}, got {actual}")]
    AddressMismatch { expected: Pubkey, actual: Pubkey },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
