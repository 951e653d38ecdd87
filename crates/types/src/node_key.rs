//! Node key persistence.
//!
//! Each node keeps a long-lived ed25519 key on disk as base64 JSON. The
//! node id, the hex of the first twenty bytes of the SHA-256 of the
//! public key, identifies the peer on the network.

use serde::{Deserialize, Serialize};

use crate::crypto::KeyPair;
use crate::genesis::KeyJson;
use crate::{PeerId, TypesError};

#[derive(Debug, Serialize, Deserialize)]
struct NodeKeyJson {
    priv_key: KeyJson,
}

/// A node's network identity key.
#[derive(Debug, Clone)]
pub struct NodeKey {
    pub key: KeyPair,
}

impl NodeKey {
    /// Generate a fresh node key.
    pub fn generate() -> NodeKey {
        NodeKey {
            key: KeyPair::generate(),
        }
    }

    /// The peer id derived from the public key.
    pub fn node_id(&self) -> PeerId {
        PeerId(self.key.address().to_string())
    }

    /// Load a node key from its JSON file.
    pub fn load(path: &std::path::Path) -> Result<NodeKey, TypesError> {
        use base64::Engine;
        let contents = std::fs::read_to_string(path)?;
        let json: NodeKeyJson =
            serde_json::from_str(&contents).map_err(|e| TypesError::Invalid {
                what: "node key",
                reason: e.to_string(),
            })?;
        let seed = base64::engine::general_purpose::STANDARD
            .decode(&json.priv_key.value)
            .map_err(|_| TypesError::Invalid {
                what: "node key",
                reason: "invalid base64".into(),
            })?;
        Ok(NodeKey {
            key: KeyPair::from_seed(&seed)?,
        })
    }

    /// Write the key to `path`, creating parent directories as needed.
    pub fn save(&self, path: &std::path::Path) -> Result<(), TypesError> {
        use base64::Engine;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = NodeKeyJson {
            priv_key: KeyJson {
                key_type: "basalt/PrivKeyEd25519".to_owned(),
                value: base64::engine::general_purpose::STANDARD.encode(self.key.seed()),
            },
        };
        let contents = serde_json::to_string_pretty(&json).map_err(|e| TypesError::Invalid {
            what: "node key",
            reason: e.to_string(),
        })?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Load the key at `path`, generating and saving one if absent.
    pub fn load_or_generate(path: &std::path::Path) -> Result<NodeKey, TypesError> {
        if path.exists() {
            NodeKey::load(path)
        } else {
            let key = NodeKey::generate();
            key.save(path)?;
            Ok(key)
        }
    }
}
