// Identity - recovery phrase in, stable signing keypair out

mod keys;
mod phrase;
mod store;

pub use keys::{Identity, Seed, SEED_LEN};
pub use phrase::RecoveryPhrase;
pub use store::PhraseStore;

use thiserror::Error;

/// Namespace every relaychat identity is derived under
pub const DEFAULT_NAMESPACE: &str = "relaychat";
/// Purpose tag for the transport keypair
pub const SWARM_PURPOSE: &str = "swarm-keypair";

/// Identity error types. Any of these at start-up is fatal.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity namespace must not be empty")]
    EmptyNamespace,
    #[error("Malformed recovery phrase: {0}")]
    MalformedPhrase(String),
    #[error("Invalid public key")]
    InvalidPublicKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Phrase storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Resolves the process identity from a phrase store
pub struct IdentityManager {
    store: PhraseStore,
    namespace: String,
    identity: Option<Identity>,
}

impl IdentityManager {
    /// Create a new identity manager with in-memory storage
    pub fn new() -> Self {
        Self::with_store(PhraseStore::memory())
    }

    pub fn with_store(store: PhraseStore) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
            identity: None,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Load the stored phrase (or create one) and derive the identity from it
    pub fn initialize(&mut self) -> Result<&Identity, IdentityError> {
        let (phrase, created) = self.store.load_or_create()?;
        if created {
            tracing::info!("🔑 Generated new recovery phrase");
        } else {
            tracing::info!("🔑 Loaded existing recovery phrase");
        }
        self.initialize_from_phrase(&phrase)
    }

    /// Derive the identity from an explicit phrase and store that phrase
    pub fn restore(&mut self, phrase: &RecoveryPhrase) -> Result<&Identity, IdentityError> {
        self.store.save(phrase)?;
        self.initialize_from_phrase(phrase)
    }

    /// Use a throwaway identity; nothing is written to the store
    pub fn initialize_ephemeral(&mut self) -> &Identity {
        tracing::info!("🔑 Using ephemeral identity");
        self.identity.insert(Identity::generate())
    }

    fn initialize_from_phrase(&mut self, phrase: &RecoveryPhrase) -> Result<&Identity, IdentityError> {
        let identity = Identity::derive(&phrase.to_seed(), &self.namespace, SWARM_PURPOSE)?;
        tracing::debug!(peer_id = %identity.peer_id(), "Derived identity");
        Ok(self.identity.insert(identity))
    }

    /// Get the identity (if initialized)
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Get identity public key as hex string
    pub fn peer_id(&self) -> Option<String> {
        self.identity.as_ref().map(|i| i.peer_id())
    }

    /// The phrase currently on record, if any
    pub fn stored_phrase(&self) -> Result<Option<RecoveryPhrase>, IdentityError> {
        self.store.load()
    }
}

impl Default for IdentityManager {
    fn default() -> Self {
        Self::new()
    }
}
