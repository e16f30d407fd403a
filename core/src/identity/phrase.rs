// Recovery phrase: the only identity material that is ever persisted

use super::keys::{Seed, SEED_LEN};
use super::IdentityError;
use sha2::Sha512;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const PBKDF2_ROUNDS: u32 = 2048;
const PBKDF2_SALT: &[u8] = b"relaychat-recovery";

const GROUPS: usize = 8;
const GROUP_LEN: usize = 8;

/// Human-transcribable recovery phrase, e.g. `3f2a9c01-...` (eight groups of
/// eight hex characters). Wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase(String);

impl RecoveryPhrase {
    /// Generate a new phrase from 32 bytes of OS randomness
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut entropy = Zeroizing::new([0u8; SEED_LEN]);
        rand::rngs::OsRng.fill_bytes(entropy.as_mut_slice());

        let encoded = Zeroizing::new(hex::encode(&*entropy));
        let groups: Vec<&str> = (0..GROUPS)
            .map(|i| &encoded[i * GROUP_LEN..(i + 1) * GROUP_LEN])
            .collect();
        Self(groups.join("-"))
    }

    /// Parse a phrase typed or loaded by the user.
    ///
    /// Surrounding whitespace is trimmed, case is folded and spaces are
    /// accepted in place of dashes.
    pub fn parse(input: &str) -> Result<Self, IdentityError> {
        let normalized = input.trim().to_ascii_lowercase().replace(' ', "-");
        let groups: Vec<&str> = normalized.split('-').filter(|g| !g.is_empty()).collect();

        if groups.len() != GROUPS {
            return Err(IdentityError::MalformedPhrase(format!(
                "expected {} groups, got {}",
                GROUPS,
                groups.len()
            )));
        }
        for group in &groups {
            if group.len() != GROUP_LEN || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(IdentityError::MalformedPhrase(format!(
                    "invalid group '{}'",
                    group
                )));
            }
        }

        Ok(Self(groups.join("-")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stretch the phrase into a seed with PBKDF2-HMAC-SHA512.
    /// The seed is wiped when the returned buffer drops.
    pub fn to_seed(&self) -> Zeroizing<Seed> {
        let mut seed = Zeroizing::new([0u8; SEED_LEN]);
        pbkdf2::pbkdf2_hmac::<Sha512>(
            self.0.as_bytes(),
            PBKDF2_SALT,
            PBKDF2_ROUNDS,
            seed.as_mut_slice(),
        );
        seed
    }
}

impl std::fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecoveryPhrase(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_phrase_shape() {
        let phrase = RecoveryPhrase::generate();
        let groups: Vec<&str> = phrase.as_str().split('-').collect();
        assert_eq!(groups.len(), 8);
        assert!(groups.iter().all(|g| g.len() == 8));
    }

    #[test]
    fn test_generated_phrase_parses_back() {
        let phrase = RecoveryPhrase::generate();
        let parsed = RecoveryPhrase::parse(phrase.as_str()).unwrap();
        assert_eq!(phrase, parsed);
    }

    #[test]
    fn test_parse_is_lenient() {
        let canonical = RecoveryPhrase::parse(
            "0011aabb-2233ccdd-4455eeff-66778899-00112233-44556677-8899aabb-ccddeeff",
        )
        .unwrap();
        let sloppy = RecoveryPhrase::parse(
            "  0011AABB 2233ccdd 4455EEFF 66778899 00112233 44556677 8899aabb ccddeeff\n",
        )
        .unwrap();
        assert_eq!(canonical, sloppy);
        assert_eq!(canonical.to_seed(), sloppy.to_seed());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(RecoveryPhrase::parse("").is_err());
        assert!(RecoveryPhrase::parse("0011aabb-2233ccdd").is_err());
        assert!(RecoveryPhrase::parse(
            "zz11aabb-2233ccdd-4455eeff-66778899-00112233-44556677-8899aabb-ccddeeff"
        )
        .is_err());
    }

    #[test]
    fn test_seed_is_stable() {
        let phrase = RecoveryPhrase::generate();
        assert_eq!(phrase.to_seed(), phrase.to_seed());
        assert_ne!(phrase.to_seed(), RecoveryPhrase::generate().to_seed());
    }

    #[test]
    fn test_seed_buffer_can_be_wiped() {
        let phrase = RecoveryPhrase::generate();
        let mut seed: Zeroizing<Seed> = phrase.to_seed();
        assert_ne!(*seed, [0u8; SEED_LEN]);

        seed.zeroize();
        assert_eq!(*seed, [0u8; SEED_LEN]);
        // the phrase still derives the same seed afterwards
        assert_eq!(phrase.to_seed(), RecoveryPhrase::parse(phrase.as_str()).unwrap().to_seed());
    }

    #[test]
    fn test_debug_redacts() {
        let phrase = RecoveryPhrase::generate();
        let rendered = format!("{:?}", phrase);
        assert!(!rendered.contains(&phrase.as_str()[..8]));
    }
}
