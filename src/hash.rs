//! Canonical map hashing and the run-hash fingerprint used to gate re-runs.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hashes a string-keyed map over its sorted keys, so the result does not depend on
/// insertion or iteration order. An empty map hashes to the empty string, not to
/// `sha256("")`, so an unresolved input stays visibly empty rather than looking resolved.
pub fn sha256_map<V: AsRef<[u8]>>(map: &BTreeMap<String, V>) -> String {
    if map.is_empty() {
        return String::new();
    }

    let mut hasher = Sha256::new();

    // BTreeMap already iterates in sorted key order.
    for (key, value) in map {
        hasher.update(key.as_bytes());
        hasher.update(value.as_ref());
    }

    hex::encode(hasher.finalize())
}

/// Computes the 10-hex-character run hash for a state reconcile.
///
/// Inputs, in hashing order: the canonical hash of the combined variable map, the module's
/// content hash, the state's version as a little-endian i32, and the action name.
pub fn run_hash(combined_vars: &BTreeMap<String, String>, module_content_hash: &str, version: i32, action: &str) -> String {
    let var_hash = sha256_map(combined_vars);

    let mut hasher = Sha256::new();
    hasher.update(var_hash.as_bytes());
    hasher.update(module_content_hash.as_bytes());
    hasher.update(version.to_le_bytes());
    hasher.update(action.as_bytes());

    let digest = hex::encode(hasher.finalize());
    digest[..10].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_map_empty_is_empty_string() {
        // Given
        let map: BTreeMap<String, String> = BTreeMap::new();

        // When
        let hashed = sha256_map(&map);

        // Then
        assert_eq!(hashed, "");
    }

    #[test]
    fn test_sha256_map_is_order_insensitive() {
        // Given
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());

        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        // When / Then
        assert_eq!(sha256_map(&a), sha256_map(&b));
    }

    #[test]
    fn test_run_hash_is_stable() {
        // Given
        let mut vars = BTreeMap::new();
        vars.insert("key".to_string(), "state-1".to_string());

        // When
        let first = run_hash(&vars, "deadbeef", 1, "create");
        let second = run_hash(&vars, "deadbeef", 1, "create");

        // Then
        assert_eq!(first, second);
        assert_eq!(first.len(), 10);
    }

    #[test]
    fn test_run_hash_is_sensitive_to_version() {
        // Given
        let vars = BTreeMap::new();

        // When
        let v1 = run_hash(&vars, "deadbeef", 1, "create");
        let v2 = run_hash(&vars, "deadbeef", 2, "create");

        // Then
        assert_ne!(v1, v2);
    }

    #[test]
    fn test_run_hash_is_sensitive_to_action() {
        // Given
        let vars = BTreeMap::new();

        // When
        let create = run_hash(&vars, "deadbeef", 1, "create");
        let destroy = run_hash(&vars, "deadbeef", 1, "destroy");

        // Then
        assert_ne!(create, destroy);
    }
}
