use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a token. This is also the session cookie value.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// The set of tokens allowed through the gate, kept only as digests.
#[derive(Debug, Clone)]
pub struct TokenSet {
    hashes: Vec<String>,
}

impl TokenSet {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        TokenSet {
            hashes: allowed
                .into_iter()
                .map(|token| hash_token(token.as_ref()))
                .collect(),
        }
    }

    /// Checks `value` against the allowed tokens. With `is_hash` the value is
    /// taken to be a digest already (cookie), otherwise it is hashed first.
    pub fn is_valid(&self, value: &str, is_hash: bool) -> bool {
        if self.hashes.is_empty() {
            return false;
        }

        let provided = if is_hash {
            value.to_owned()
        } else {
            hash_token(value)
        };

        // No early exit so every digest is compared.
        self.hashes
            .iter()
            .fold(false, |found, allowed| {
                found | constant_time_eq(provided.as_bytes(), allowed.as_bytes())
            })
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
