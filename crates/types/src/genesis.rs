//! Genesis documents.

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::hash::Address;
use crate::params::ConsensusParams;
use crate::time::Timestamp;
use crate::TypesError;

/// Longest accepted chain id, in bytes.
pub const MAX_CHAIN_ID_LEN: usize = 50;

/// JSON form of a public key: `{"type": ..., "value": <base64>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyJson {
    #[serde(rename = "type")]
    pub key_type: String,
    pub value: String,
}

impl KeyJson {
    pub fn ed25519(key: &PublicKey) -> Self {
        use base64::Engine;
        Self {
            key_type: "basalt/PubKeyEd25519".to_owned(),
            value: base64::engine::general_purpose::STANDARD.encode(key.as_bytes()),
        }
    }

    pub fn decode(&self) -> Result<PublicKey, TypesError> {
        use base64::Engine;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&self.value)
            .map_err(|_| TypesError::Invalid {
                what: "genesis key",
                reason: "invalid base64".into(),
            })?;
        PublicKey::from_slice(&bytes)
    }
}

/// One validator entry of the genesis document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// Hex address; derived from the public key when empty.
    #[serde(default)]
    pub address: String,
    pub pub_key: KeyJson,
    pub power: i64,
    #[serde(default)]
    pub name: String,
}

impl GenesisValidator {
    pub fn public_key(&self) -> Result<PublicKey, TypesError> {
        self.pub_key.decode()
    }

    pub fn derived_address(&self) -> Result<Address, TypesError> {
        if self.address.is_empty() {
            Ok(self.public_key()?.address())
        } else {
            Address::from_hex(&self.address)
        }
    }
}

/// The chain's initial state, loaded from a JSON file at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenesisDoc {
    #[serde(default)]
    pub genesis_time: Timestamp,
    pub chain_id: String,
    #[serde(default)]
    pub initial_height: i64,
    #[serde(default)]
    pub consensus_params: Option<ConsensusParams>,
    pub validators: Vec<GenesisValidator>,
    /// Hex app hash of the initial application state.
    #[serde(default)]
    pub app_hash: String,
    /// Opaque application state, forwarded to `init_chain`.
    #[serde(default)]
    pub app_state: serde_json::Value,
}

impl GenesisDoc {
    /// Validate the document and fill in derivable fields: a zero initial
    /// height becomes 1, missing consensus params become defaults, empty
    /// validator addresses are derived from their public keys and a zero
    /// genesis time is stamped with `now`.
    pub fn validate_and_complete(&mut self, now: Timestamp) -> Result<(), TypesError> {
        if self.chain_id.is_empty() {
            return Err(TypesError::Invalid {
                what: "genesis doc",
                reason: "chain_id must not be empty".into(),
            });
        }
        if self.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(TypesError::Invalid {
                what: "genesis doc",
                reason: format!("chain_id longer than {MAX_CHAIN_ID_LEN} bytes"),
            });
        }
        if self.initial_height < 0 {
            return Err(TypesError::Invalid {
                what: "genesis doc",
                reason: "initial_height cannot be negative".into(),
            });
        }
        if self.initial_height == 0 {
            self.initial_height = 1;
        }
        match &self.consensus_params {
            None => self.consensus_params = Some(ConsensusParams::default()),
            Some(params) => params.validate()?,
        }
        for validator in &mut self.validators {
            if validator.power <= 0 {
                return Err(TypesError::Invalid {
                    what: "genesis doc",
                    reason: format!("validator {} has no voting power", validator.name),
                });
            }
            let derived = validator.public_key()?.address();
            if validator.address.is_empty() {
                validator.address = derived.to_string();
            } else if Address::from_hex(&validator.address)? != derived {
                return Err(TypesError::Invalid {
                    what: "genesis doc",
                    reason: format!(
                        "validator address {} does not match its public key",
                        validator.address
                    ),
                });
            }
        }
        if self.genesis_time == 0 {
            self.genesis_time = now;
        }
        Ok(())
    }

    pub fn from_file(path: &std::path::Path) -> Result<GenesisDoc, TypesError> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| TypesError::Invalid {
            what: "genesis doc",
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), TypesError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| TypesError::Invalid {
            what: "genesis doc",
            reason: e.to_string(),
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
