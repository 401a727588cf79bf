/// SHA-256 / RIPEMD-160 hashing utilities.
///
/// Used throughout the engine for:
/// - Shard identification: the bridge-visible hash of a shard is
///   RIPEMD-160(SHA-256(shard))
/// - Audit tree construction (double application of the same digest)
/// - Basic-auth password hashing (hex SHA-256, client-side)
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hex-encoded SHA-256, used for client-side password hashing.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// RIPEMD-160 digest.
pub fn rmd160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(data).into()
}

/// RIPEMD-160 of a SHA-256 digest, the network's shard-hash primitive.
pub fn rmd160_sha256(data: &[u8]) -> [u8; 20] {
    rmd160(&sha256(data))
}

/// Hex-encoded RIPEMD-160(SHA-256(data)).
pub fn rmd160_sha256_hex(data: &[u8]) -> String {
    hex::encode(rmd160_sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"password"),
            "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8"
        );
    }

    #[test]
    fn test_rmd160_sha256_deterministic() {
        let a = rmd160_sha256(b"shard bytes");
        let b = rmd160_sha256(b"shard bytes");
        assert_eq!(a, b);
        assert_ne!(a, rmd160_sha256(b"other bytes"));
    }

    #[test]
    fn test_rmd160_sha256_hex_length() {
        // RIPEMD-160 is a 20-byte digest, 40 hex chars.
        assert_eq!(rmd160_sha256_hex(b"anything").len(), 40);
    }

    #[test]
    fn test_rmd160_differs_from_composition_input() {
        let inner = sha256(b"data");
        assert_eq!(rmd160(&inner), rmd160_sha256(b"data"));
    }
}
