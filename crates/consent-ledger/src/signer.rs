//! Two-stage chain signer.
//!
//! `digest(n) = BLAKE3-derive("consent-ledger chain v1", digest(n-1) || SHA-512(bytes(n)) || bytes(n))`
//!
//! The SHA-512 stage output feeds the BLAKE3 stage together with the previous
//! digest, so each digest commits to the whole history before it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha512};

const CHAIN_CONTEXT: &str = "consent-ledger chain v1";
const GENESIS_CONTEXT: &str = "consent-ledger genesis v1";

/// 32-byte chain digest, hex encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainDigest([u8; 32]);

impl ChainDigest {
    pub const LEN: usize = 32;

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Fixed digest that precedes sequence number 1.
    pub fn genesis() -> Self {
        Self(blake3::derive_key(GENESIS_CONTEXT, &[]))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ChainDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainDigest({})", self.short())
    }
}

impl fmt::Display for ChainDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ChainDigest {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| format!("invalid digest hex: {e}"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| format!("digest must be 32 bytes, got {}", v.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ChainDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChainDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Computes and checks chain digests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainSigner;

impl ChainSigner {
    pub fn new() -> Self {
        Self
    }

    pub fn sign(&self, prev: &ChainDigest, canonical_bytes: &[u8]) -> ChainDigest {
        let inner = Sha512::digest(canonical_bytes);

        let mut outer = blake3::Hasher::new_derive_key(CHAIN_CONTEXT);
        outer.update(prev.as_bytes());
        outer.update(&inner);
        outer.update(canonical_bytes);
        ChainDigest(*outer.finalize().as_bytes())
    }

    pub fn verify(&self, prev: &ChainDigest, canonical_bytes: &[u8], claimed: &ChainDigest) -> bool {
        let computed = blake3::Hash::from(*self.sign(prev, canonical_bytes).as_bytes());
        // blake3::Hash equality is constant time.
        computed == blake3::Hash::from(*claimed.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_fixed() {
        assert_eq!(ChainDigest::genesis(), ChainDigest::genesis());
        assert_ne!(ChainDigest::genesis(), ChainDigest::from_bytes([0; 32]));
    }

    #[test]
    fn sign_is_deterministic_and_verifies() {
        let signer = ChainSigner::new();
        let prev = ChainDigest::genesis();
        let a = signer.sign(&prev, b"payload");
        let b = signer.sign(&prev, b"payload");
        assert_eq!(a, b);
        assert!(signer.verify(&prev, b"payload", &a));
    }

    #[test]
    fn digest_depends_on_previous_and_payload() {
        let signer = ChainSigner::new();
        let genesis = ChainDigest::genesis();
        let first = signer.sign(&genesis, b"one");

        assert_ne!(signer.sign(&genesis, b"two"), signer.sign(&first, b"two"));
        assert_ne!(signer.sign(&genesis, b"one"), signer.sign(&genesis, b"one!"));
        assert!(!signer.verify(&first, b"one", &first));
    }

    #[test]
    fn hex_round_trip_through_serde() {
        let digest = ChainSigner::new().sign(&ChainDigest::genesis(), b"x");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest.to_hex()));
        let back: ChainDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }

    #[test]
    fn rejects_short_hex() {
        assert!("abcd".parse::<ChainDigest>().is_err());
        assert!("zz".parse::<ChainDigest>().is_err());
    }
}
