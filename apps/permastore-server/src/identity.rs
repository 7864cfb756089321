//! Signing identity
//!
//! Loads a ledger wallet from its JSON Web Key document. The key is held only
//! for the lifetime of the request that supplied it and is never persisted.

use std::fmt;

use base64::Engine;
use rsa::pss::BlindedSigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ledger::BASE64_URL;

/// The only public exponent the ledger accepts (AQAB)
const PUBLIC_EXPONENT: u64 = 65537;

/// Identity loading and signing errors
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("No wallet key document was supplied")]
    Missing,

    #[error("Wallet is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Unsupported key: {0}")]
    UnsupportedKey(String),

    #[error("Wallet field '{field}' is not valid base64url: {source}")]
    InvalidEncoding {
        field: &'static str,
        source: base64::DecodeError,
    },

    #[error("Wallet key is invalid: {0}")]
    InvalidKey(#[from] rsa::Error),

    #[error("Signing failed: {0}")]
    Signing(String),
}

/// RSA private key in JWK form
#[derive(Deserialize)]
struct Jwk {
    kty: String,
    n: Option<String>,
    e: Option<String>,
    d: Option<String>,
    p: Option<String>,
    q: Option<String>,
}

/// A wallet keypair plus its derived ledger address
pub struct Identity {
    key: RsaPrivateKey,
    owner: Vec<u8>,
    address: String,
}

impl Identity {
    /// Parse a JWK document into an identity.
    ///
    /// Fails closed: any missing component, bad encoding, or inconsistent key
    /// is an error, never a substitute identity.
    pub fn from_jwk(document: &[u8]) -> Result<Self, IdentityError> {
        let jwk: Jwk = serde_json::from_slice(document)?;

        if jwk.kty != "RSA" {
            return Err(IdentityError::UnsupportedKey(format!(
                "key type '{}' (expected RSA)",
                jwk.kty
            )));
        }

        let n = decode_component("n", jwk.n.as_deref())?;
        let e = decode_component("e", jwk.e.as_deref())?;
        let d = decode_component("d", jwk.d.as_deref())?;
        let p = decode_component("p", jwk.p.as_deref())?;
        let q = decode_component("q", jwk.q.as_deref())?;

        if e != BigUint::from(PUBLIC_EXPONENT) {
            return Err(IdentityError::UnsupportedKey(
                "public exponent must be 65537".to_string(),
            ));
        }

        let key = RsaPrivateKey::from_components(n, e, d, vec![p, q])?;
        key.validate()?;

        Ok(Self::from_private_key(key))
    }

    fn from_private_key(key: RsaPrivateKey) -> Self {
        let owner = key.n().to_bytes_be();
        let address = BASE64_URL.encode(Sha256::digest(&owner));
        Self {
            key,
            owner,
            address,
        }
    }

    /// Ledger address: base64url(SHA-256(modulus))
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Raw public modulus, the transaction `owner` field
    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    /// Sign a message with RSA-PSS/SHA-256.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, IdentityError> {
        let signing_key = BlindedSigningKey::<Sha256>::new(self.key.clone());
        let signature = signing_key
            .try_sign_with_rng(&mut rand::thread_rng(), message)
            .map_err(|e| IdentityError::Signing(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn decode_component(field: &'static str, value: Option<&str>) -> Result<BigUint, IdentityError> {
    let value = value.ok_or_else(|| {
        IdentityError::UnsupportedKey(format!("missing private key component '{}'", field))
    })?;
    let bytes = BASE64_URL
        .decode(value)
        .map_err(|source| IdentityError::InvalidEncoding { field, source })?;
    Ok(BigUint::from_bytes_be(&bytes))
}
