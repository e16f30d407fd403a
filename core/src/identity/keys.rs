// Deterministic signing identity

use super::IdentityError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::{Zeroize, Zeroizing};

/// Length of the seed an identity is derived from
pub const SEED_LEN: usize = 32;

/// Raw seed material (typically produced from a recovery phrase)
pub type Seed = [u8; SEED_LEN];

/// Signing keypair used for transport authentication and as the peer identifier.
///
/// `public_key` is the 32-byte Ed25519 verifying key, `secret_key` the 64-byte
/// `seed || public_key` keypair encoding.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Derive an identity from `seed`, separated by `namespace` and `purpose`.
    ///
    /// Identical inputs always yield the identical keypair, so persisting the
    /// seed (or the phrase behind it) is enough to come back as the same peer.
    pub fn derive(seed: &Seed, namespace: &str, purpose: &str) -> Result<Self, IdentityError> {
        if namespace.is_empty() {
            return Err(IdentityError::EmptyNamespace);
        }

        let material = Zeroizing::new(seed_material(seed, namespace, purpose));
        let signing_key = SigningKey::from_bytes(&material);

        Ok(Self { signing_key })
    }

    /// Fresh random identity for ephemeral sessions. Never persisted.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; SEED_LEN];
        rand::rngs::OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Returns a `Zeroizing` buffer that wipes the secret on drop.
    pub fn secret_key(&self) -> Zeroizing<[u8; 64]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    /// Hex-encoded public key, the peer identifier announced to the relay
    pub fn peer_id(&self) -> String {
        hex::encode(self.public_key())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Sign data
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    /// Verify a signature made by the holder of `public_key`
    pub fn verify(data: &[u8], signature: &[u8], public_key: &[u8]) -> Result<bool, IdentityError> {
        let key_bytes: &[u8; 32] = public_key
            .try_into()
            .map_err(|_| IdentityError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(key_bytes).map_err(|_| IdentityError::InvalidPublicKey)?;

        let sig_bytes: &[u8; 64] = signature
            .try_into()
            .map_err(|_| IdentityError::InvalidSignature)?;
        let sig = Signature::from_bytes(sig_bytes);

        Ok(verifying_key.verify(data, &sig).is_ok())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.peer_id())
            .finish_non_exhaustive()
    }
}

/// BLAKE3 over length-prefixed `namespace`, `purpose`, `seed`.
fn seed_material(seed: &Seed, namespace: &str, purpose: &str) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in [namespace.as_bytes(), purpose.as_bytes(), seed.as_slice()] {
        hasher.update(&(part.len() as u32).to_le_bytes());
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}
