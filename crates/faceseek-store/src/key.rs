//! Cache key derivation from source identifiers.

use sha2::{Digest, Sha256};

/// Content-addressed cache key for an image source (URL or local path):
/// the lowercase hex SHA-256 of the normalized identifier.
///
/// Two calls with the same logical source always yield the same key,
/// independent of call order or incidental formatting such as surrounding
/// whitespace or a trailing slash on a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn from_identifier(identifier: &str) -> Self {
        let digest = Sha256::digest(normalize(identifier).as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        SourceKey(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form of an identifier: trimmed, with a single trailing slash
/// stripped from URL-shaped identifiers.
pub fn normalize(identifier: &str) -> String {
    let trimmed = identifier.trim();
    let is_url = trimmed.starts_with("http://") || trimmed.starts_with("https://");
    if is_url {
        if let Some(stripped) = trimmed.strip_suffix('/') {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
