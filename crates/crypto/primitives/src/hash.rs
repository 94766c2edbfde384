use arbor_types::H256;
use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn sha256_h256(data: &[u8]) -> H256 {
    H256(sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(sha256(b"arbor"), sha256(b"arbor"));
        assert_ne!(sha256(b"arbor"), sha256(b"robra"));
    }
}
