//! Repository cache keys (§3, §6). The repository archive itself is
//! external storage (`skein-build` owns reading/writing it); this
//! module only fixes the keys' shapes so both sides agree on them.

use crate::Atom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A SHA-256 digest of a module's source bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDigest([u8; 32]);

impl SourceDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for SourceDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceDigest({})", self.to_hex())
    }
}

/// `(qualifiedName, sha-of-source)` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionKey {
    pub qualified_name: Atom,
    pub source_digest: SourceDigest,
}

impl VersionKey {
    pub fn new(qualified_name: Atom, source_digest: SourceDigest) -> Self {
        Self {
            qualified_name,
            source_digest,
        }
    }
}

/// The tuple of predecessor compilation timestamps, in import order
/// (§3). A `ModuleCompilation` cached under one `CompilationKey` is
/// only valid for lookups presenting the exact same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompilationKey(pub Vec<i64>);

impl CompilationKey {
    pub fn new(predecessor_timestamps: Vec<i64>) -> Self {
        Self(predecessor_timestamps)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_hash_to_same_digest() {
        let a = SourceDigest::of(b"module Foo");
        let b = SourceDigest::of(b"module Foo");
        assert_eq!(a, b);
    }

    #[test]
    fn different_bytes_hash_to_different_digests() {
        let a = SourceDigest::of(b"module Foo");
        let b = SourceDigest::of(b"module Bar");
        assert_ne!(a, b);
    }

    #[test]
    fn compilation_key_equality_is_order_sensitive() {
        let a = CompilationKey::new(vec![1, 2]);
        let b = CompilationKey::new(vec![2, 1]);
        assert_ne!(a, b);
    }

    #[test]
    fn version_key_distinguishes_same_name_different_digest() {
        let name = Atom::new("Foo");
        let k1 = VersionKey::new(name.clone(), SourceDigest::of(b"a"));
        let k2 = VersionKey::new(name, SourceDigest::of(b"b"));
        assert_ne!(k1, k2);
    }
}
