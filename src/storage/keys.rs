//! Storage key normalization and the per-origin key set cleared by a flush

/// Character substituted for anything the host keychain rejects
pub const SAFE_SEPARATOR: char = '-';

/// Namespace prefix the signer uses for its per-origin keys
pub const KEY_NAMESPACE: &str = "embedded-wallet";

/// Per-origin keys removed by `storage:flush`
pub const FLUSH_KEY_SUFFIXES: [&str; 8] = [
    "account-id",
    "device-id",
    "chain-id",
    "address",
    "owner-address",
    "key-share",
    "account-kind",
    "signer-id",
];

/// Map a key onto the keychain-safe alphabet (`[A-Za-z0-9._-]`).
///
/// Idempotent: normalizing an already normalized key returns it unchanged.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                SAFE_SEPARATOR
            }
        })
        .collect()
}

/// Raw (un-normalized) key for an origin-scoped value
pub fn origin_key(origin: &str, suffix: &str) -> String {
    format!("{}:{}:{}", KEY_NAMESPACE, origin, suffix)
}

/// Normalized keys a flush for `origin` deletes
pub fn flush_keys(origin: &str) -> Vec<String> {
    FLUSH_KEY_SUFFIXES
        .iter()
        .map(|suffix| normalize_key(&origin_key(origin, suffix)))
        .collect()
}
