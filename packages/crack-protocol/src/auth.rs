//! 预共享口令的质询应答认证。
//!
//! 监听端随机生成质询，对端回以 HMAC-SHA256(口令, 质询)；
//! 校验走 `Mac::verify_slice`，对比是常数时间的。

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// 质询随机数长度（字节）。
pub const CHALLENGE_LEN: usize = 16;
/// 应答摘要长度（字节）。
pub const DIGEST_LEN: usize = 32;

/// 计算对质询的应答摘要。
pub fn challenge_digest(secret: &[u8], challenge: &[u8]) -> [u8; DIGEST_LEN] {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC 接受任意长度的密钥");
    mac.update(challenge);
    mac.finalize().into_bytes().into()
}

/// 校验对端送来的应答。
pub fn verify_digest(secret: &[u8], challenge: &[u8], digest: &[u8]) -> bool {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC 接受任意长度的密钥");
    mac.update(challenge);
    mac.verify_slice(digest).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic_and_verifies() {
        let challenge = [9u8; CHALLENGE_LEN];
        let digest = challenge_digest(b"secret", &challenge);
        assert_eq!(digest, challenge_digest(b"secret", &challenge));
        assert!(verify_digest(b"secret", &challenge, &digest));
    }

    #[test]
    fn wrong_secret_or_challenge_fails() {
        let challenge = [9u8; CHALLENGE_LEN];
        let digest = challenge_digest(b"secret", &challenge);
        assert!(!verify_digest(b"other", &challenge, &digest));
        assert!(!verify_digest(b"secret", &[0u8; CHALLENGE_LEN], &digest));
        assert!(!verify_digest(b"secret", &challenge, &digest[..16]));
    }

    #[test]
    fn empty_secret_is_a_valid_key() {
        let challenge = [1u8; CHALLENGE_LEN];
        let digest = challenge_digest(b"", &challenge);
        assert!(verify_digest(b"", &challenge, &digest));
    }
}
