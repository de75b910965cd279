use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh3::Xxh3;

/// Hasher used for asset, dependency, environment and bundle identifiers.
///
/// Identifiers must be stable across runs, machines and platforms since they end up in bundle
/// names and in the keys of shared bundles.
pub type IdentifierHasher = Xxh3;

pub fn hash_string(s: &str) -> String {
  hash_bytes(s.as_bytes())
}

pub fn hash_bytes(s: &[u8]) -> String {
  format!("{:016x}", xxh3_64(s))
}

/// Numeric form of [`hash_string`], used where the hash is bucketed rather than printed.
pub fn hash_u64(s: &str) -> u64 {
  xxh3_64(s.as_bytes())
}
