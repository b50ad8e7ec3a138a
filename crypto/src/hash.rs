//! Double SHA-256 hashing for message identity and election scores.

use sha2::{Digest, Sha256};

/// Compute SHA-256d (two rounds of SHA-256) of arbitrary data.
pub fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut output = [0u8; 32];
    output.copy_from_slice(&second);
    output
}

/// Hash multiple byte slices in sequence (avoids concatenation allocation).
pub fn sha256d_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let first = hasher.finalize();
    let second = Sha256::digest(first);
    let mut output = [0u8; 32];
    output.copy_from_slice(&second);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_deterministic() {
        let h1 = sha256d(b"hello onyx");
        let h2 = sha256d(b"hello onyx");
        assert_eq!(h1, h2);
    }

    #[test]
    fn sha256d_different_inputs() {
        assert_ne!(sha256d(b"hello"), sha256d(b"world"));
    }

    #[test]
    fn sha256d_is_double_hash() {
        let single = Sha256::digest(b"abc");
        let double = Sha256::digest(single);
        assert_eq!(sha256d(b"abc"), double.as_slice());
    }

    #[test]
    fn sha256d_multi_equivalent() {
        assert_eq!(sha256d(b"helloworld"), sha256d_multi(&[b"hello", b"world"]));
    }
}
