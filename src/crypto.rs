use crate::BlockHash;
use ed25519_dalek::Keypair;
use rand::rngs::{OsRng, StdRng};
use rand::SeedableRng;
use ring::digest;

/// Returns the SHA-256 hash of some input data as a fixed length array.
pub fn digest_sha_256(data: &[u8]) -> BlockHash {
    let mut array = [0u8; 32];
    let hash = digest::digest(&digest::SHA256, data);
    array.copy_from_slice(&hash.as_ref()[0..32]);
    array
}

/// Returns an ED25519 key pair from a randomly generated seed.
pub fn gen_keys_random() -> Keypair {
    let mut csprng = OsRng {};
    Keypair::generate(&mut csprng)
}

/// Returns an ED25519 key pair from a user provided seed, for tests and sims.
pub fn gen_keys_from_seed(seed: u64) -> Keypair {
    let mut rng = StdRng::seed_from_u64(seed);
    Keypair::generate(&mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha_256_is_stable() {
        // RFC 6234 test vector for "abc"
        let digest = digest_sha_256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn seeded_keys_are_deterministic() {
        let first = gen_keys_from_seed(42);
        let second = gen_keys_from_seed(42);
        assert_eq!(first.public.to_bytes(), second.public.to_bytes());
    }
}
