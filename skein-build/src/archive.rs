//! Content-addressed repository archive (§3, §6, §8 property 5).
//!
//! Modeled after a content-addressed blob cache: every stored record
//! is serialized to JSON and appended with a CRC32 suffix. A read
//! whose CRC doesn't match the stored bytes is treated as if the
//! record were never there — no error, just a cache miss that forces
//! recompilation. The actual persistence medium (disk, object store,
//! …) is outside this core's scope; this is the in-memory key-value
//! abstraction callers would back with one.

use serde::{Deserialize, Serialize};
use skein_core::{CompilationKey, VersionKey};
use std::collections::HashMap;
use std::sync::Mutex;

/// What the tracing phase needs once a module's header has been
/// resolved: enough to skip re-parsing a source version seen before.
/// Names are plain strings rather than `Atom`s — atoms are runtime
/// identities, reminted on every load, not archived values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedHeader {
    pub is_system_module: bool,
    pub versions: Vec<String>,
    pub imports: Vec<ArchivedImport>,
    pub exported_names: Vec<String>,
    pub entry_points: Vec<String>,
    pub pragmas: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedImport {
    pub module_name: String,
    pub acceptable_versions: Vec<String>,
    pub is_extension: bool,
    pub explicit_names: Vec<String>,
    pub renames: Vec<(String, String)>,
    pub excludes: Vec<String>,
    pub wildcard: bool,
}

/// What the loading phase stores once a module body has been
/// compiled, keyed additionally by `CompilationKey` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedCompilation {
    /// Opaque serialized top-level functions, replayed in order on
    /// reload. Actually deserializing and running them requires the
    /// runtime object model, outside this core's scope (§1).
    pub serialized_functions: Vec<Vec<u8>>,
    /// This compilation's own timestamp, fed into a dependent module's
    /// `CompilationKey` the next time it loads (§3).
    pub compiled_at: i64,
}

/// Appends a big-endian CRC32 suffix to `body`.
pub fn append_crc(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 4);
    out.extend_from_slice(body);
    out.extend_from_slice(&crc32fast::hash(body).to_be_bytes());
    out
}

/// Strips and validates the CRC32 suffix. Returns `None` on a short
/// blob or a mismatched checksum — both are "absent", never an error
/// (§8 property 5).
pub fn validated_bytes_from(blob: &[u8]) -> Option<Vec<u8>> {
    if blob.len() < 4 {
        return None;
    }
    let (body, crc_bytes) = blob.split_at(blob.len() - 4);
    let stored = u32::from_be_bytes(crc_bytes.try_into().ok()?);
    if crc32fast::hash(body) != stored {
        return None;
    }
    Some(body.to_vec())
}

pub struct Archive {
    headers: Mutex<HashMap<VersionKey, Vec<u8>>>,
    compilations: Mutex<HashMap<(VersionKey, CompilationKey), Vec<u8>>>,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    pub fn new() -> Self {
        Self {
            headers: Mutex::new(HashMap::new()),
            compilations: Mutex::new(HashMap::new()),
        }
    }

    pub fn store_header(&self, key: VersionKey, header: &ArchivedHeader) {
        let json = serde_json::to_vec(header).expect("ArchivedHeader always serializes");
        self.headers
            .lock()
            .expect("archive headers poisoned")
            .insert(key, append_crc(&json));
    }

    pub fn lookup_header(&self, key: &VersionKey) -> Option<ArchivedHeader> {
        let blob = self.headers.lock().expect("archive headers poisoned").get(key)?.clone();
        let body = validated_bytes_from(&blob)?;
        serde_json::from_slice(&body).ok()
    }

    pub fn store_compilation(
        &self,
        version_key: VersionKey,
        compilation_key: CompilationKey,
        compilation: &ArchivedCompilation,
    ) {
        let json = serde_json::to_vec(compilation).expect("ArchivedCompilation always serializes");
        self.compilations
            .lock()
            .expect("archive compilations poisoned")
            .insert((version_key, compilation_key), append_crc(&json));
    }

    pub fn lookup_compilation(
        &self,
        version_key: &VersionKey,
        compilation_key: &CompilationKey,
    ) -> Option<ArchivedCompilation> {
        let blob = self
            .compilations
            .lock()
            .expect("archive compilations poisoned")
            .get(&(version_key.clone(), compilation_key.clone()))?
            .clone();
        let body = validated_bytes_from(&blob)?;
        serde_json::from_slice(&body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skein_core::{Atom, SourceDigest};

    fn sample_header() -> ArchivedHeader {
        ArchivedHeader {
            is_system_module: false,
            versions: vec!["1.0".to_string()],
            imports: vec![],
            exported_names: vec!["foo".to_string()],
            entry_points: vec![],
            pragmas: vec![],
        }
    }

    #[test]
    fn round_trips_a_stored_header() {
        let archive = Archive::new();
        let key = VersionKey::new(Atom::new("A"), SourceDigest::of(b"module A"));
        archive.store_header(key.clone(), &sample_header());
        let loaded = archive.lookup_header(&key).unwrap();
        assert_eq!(loaded.exported_names, vec!["foo".to_string()]);
    }

    #[test]
    fn a_single_bit_flip_makes_the_blob_unreadable() {
        let body = b"not actually json but crc still checks out".to_vec();
        let mut blob = append_crc(&body);
        blob[0] ^= 0x01;
        assert!(validated_bytes_from(&blob).is_none());
    }

    #[test]
    fn intact_blob_survives_the_round_trip() {
        let body = b"hello archive".to_vec();
        let blob = append_crc(&body);
        assert_eq!(validated_bytes_from(&blob), Some(body));
    }

    #[test]
    fn missing_compilation_key_is_a_plain_miss() {
        let archive = Archive::new();
        let key = VersionKey::new(Atom::new("A"), SourceDigest::of(b"module A"));
        assert!(archive.lookup_compilation(&key, &CompilationKey::empty()).is_none());
    }

    #[test]
    fn distinct_compilation_keys_for_the_same_version_do_not_collide() {
        let archive = Archive::new();
        let key = VersionKey::new(Atom::new("A"), SourceDigest::of(b"module A"));
        let k1 = CompilationKey::new(vec![1]);
        let k2 = CompilationKey::new(vec![2]);
        archive.store_compilation(
            key.clone(),
            k1.clone(),
            &ArchivedCompilation {
                serialized_functions: vec![vec![1, 2, 3]],
                compiled_at: 1,
            },
        );
        assert!(archive.lookup_compilation(&key, &k1).is_some());
        assert!(archive.lookup_compilation(&key, &k2).is_none());
    }
}
