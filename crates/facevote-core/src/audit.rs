use blake2::{Blake2s256, Digest};

const REDACTED_HEX_LEN: usize = 16;

/// Stable short digest of an identifier for logs on the vote path.
pub fn redact(identifier: &str) -> String {
    let mut hasher = Blake2s256::new();
    hasher.update(identifier.as_bytes());
    let digest = hasher.finalize();
    let mut encoded = hex::encode(digest);
    encoded.truncate(REDACTED_HEX_LEN);
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_is_stable_and_hides_input() {
        let first = redact("voter-42");
        assert_eq!(first, redact("voter-42"));
        assert_eq!(first.len(), REDACTED_HEX_LEN);
        assert!(!first.contains("voter"));
        assert_ne!(first, redact("voter-43"));
    }
}
