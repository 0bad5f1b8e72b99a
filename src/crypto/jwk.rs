//! JSON Web Key interchange for RSA-OAEP public keys
//!
//! The public half of a local key pair is exported as a JWK document and
//! sent through the relay as a string. Peers reconstruct it with
//! [`Jwk::from_json`] and [`Jwk::to_public_key`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use rsa::{traits::PublicKeyParts, BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

use super::error::{CryptoError, CryptoResult};

/// JWK key type for RSA keys
pub const KEY_TYPE: &str = "RSA";

/// JWK algorithm name for RSA-OAEP with SHA-256
pub const ALGORITHM: &str = "RSA-OAEP-256";

/// The only key operation an imported peer key may be used for
pub const ENCRYPT_OP: &str = "encrypt";

/// A public RSA key in JSON Web Key form
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `"RSA"`
    pub kty: String,
    /// Algorithm the key is meant for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Modulus, base64url big-endian
    pub n: String,
    /// Public exponent, base64url big-endian
    pub e: String,
    /// Whether the key was marked extractable by its producer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<bool>,
    /// Permitted operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_ops: Option<Vec<String>>,
}

impl Jwk {
    /// Describe an RSA public key for encrypt-only use
    pub fn from_public_key(key: &RsaPublicKey) -> Self {
        Jwk {
            kty: KEY_TYPE.to_string(),
            alg: Some(ALGORITHM.to_string()),
            n: B64URL.encode(key.n().to_bytes_be()),
            e: B64URL.encode(key.e().to_bytes_be()),
            ext: Some(true),
            key_ops: Some(vec![ENCRYPT_OP.to_string()]),
        }
    }

    /// Rebuild the RSA public key this document describes
    pub fn to_public_key(&self) -> CryptoResult<RsaPublicKey> {
        if self.kty != KEY_TYPE {
            return Err(CryptoError::KeyImport(format!(
                "unsupported key type {:?}",
                self.kty
            )));
        }

        if let Some(alg) = &self.alg {
            if alg != ALGORITHM {
                return Err(CryptoError::KeyImport(format!(
                    "unsupported algorithm {:?}",
                    alg
                )));
            }
        }

        if let Some(ops) = &self.key_ops {
            if !ops.iter().any(|op| op == ENCRYPT_OP) {
                return Err(CryptoError::KeyImport(
                    "key is not usable for encryption".to_string(),
                ));
            }
        }

        let n = decode_uint(&self.n, "n")?;
        let e = decode_uint(&self.e, "e")?;

        RsaPublicKey::new(n, e).map_err(|e| CryptoError::KeyImport(e.to_string()))
    }

    /// Serialize to the JSON string sent over the relay
    pub fn to_json(&self) -> CryptoResult<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::KeyGeneration(e.to_string()))
    }

    /// Parse a JSON string received from a peer
    pub fn from_json(json: &str) -> CryptoResult<Self> {
        serde_json::from_str(json).map_err(|e| CryptoError::KeyImport(e.to_string()))
    }
}

fn decode_uint(field: &str, name: &str) -> CryptoResult<BigUint> {
    let bytes = B64URL
        .decode(field.trim_end_matches('='))
        .map_err(|e| CryptoError::KeyImport(format!("bad {}: {}", name, e)))?;

    if bytes.is_empty() {
        return Err(CryptoError::KeyImport(format!("empty {}", name)));
    }

    Ok(BigUint::from_bytes_be(&bytes))
}
