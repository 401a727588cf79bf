/// Ed25519 key pair used to sign bridge requests.
///
/// The bridge associates public keys with an account (`POST /keys`); a
/// signed request carries the hex public key and a hex signature over
/// `method + "\n" + path + "\n" + payload`.
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{EngineError, Result};

/// Request-signing key pair.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load a key pair from a hex-encoded 32-byte secret key.
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex)
            .map_err(|e| EngineError::Config(format!("Invalid secret key hex: {e}")))?;
        let secret: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EngineError::Config("Secret key must be 32 bytes".to_string()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&secret),
        })
    }

    /// Hex-encoded secret key, for persistence by the caller.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Hex-encoded public key, sent as the `x-pubkey` header.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Verifying half of the pair.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Hex-encoded signature over `message`, sent as `x-signature`.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}
