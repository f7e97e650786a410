//! AEAD 封装：统一 AES-256-GCM 与 ChaCha20-Poly1305 的加解密入口。
//!
//! 所有数据面与静态存储加密都经由这里，失败只映射为
//! `EncryptionFailed` / `DecryptionFailed`，不透出底层原因。

use aes_gcm::aead::{Aead, AeadCore, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20poly1305::ChaCha20Poly1305;
use rand_core::OsRng;

use crate::common::config::AeadAlgorithm;
use crate::error::{Error, Result};

/// AEAD 密钥长度（两种算法均为 256 位）
pub const KEY_SIZE: usize = 32;
/// Nonce 长度（两种算法均为 96 位）
pub const NONCE_SIZE: usize = 12;

/// 使用新生成的随机 nonce 加密，返回 (nonce, 密文)。
pub(crate) fn seal(
    algorithm: AeadAlgorithm,
    key: &[u8; KEY_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<([u8; NONCE_SIZE], Vec<u8>)> {
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let mut nonce_out = [0u8; NONCE_SIZE];
    let ciphertext = match algorithm {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::EncryptionFailed)?;
            let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
            nonce_out.copy_from_slice(&nonce);
            cipher
                .encrypt(&nonce, payload)
                .map_err(|_| Error::EncryptionFailed)?
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::EncryptionFailed)?;
            let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
            nonce_out.copy_from_slice(&nonce);
            cipher
                .encrypt(&nonce, payload)
                .map_err(|_| Error::EncryptionFailed)?
        }
    };
    Ok((nonce_out, ciphertext))
}

/// 解密并校验认证标签。任何失败（标签不匹配、格式错误）都返回
/// `DecryptionFailed`，且不输出任何明文字节。
pub(crate) fn open(
    algorithm: AeadAlgorithm,
    key: &[u8; KEY_SIZE],
    aad: &[u8],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>> {
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    match algorithm {
        AeadAlgorithm::Aes256Gcm => {
            let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| Error::DecryptionFailed)?;
            cipher
                .decrypt(Nonce::from_slice(nonce), payload)
                .map_err(|_| Error::DecryptionFailed)
        }
        AeadAlgorithm::ChaCha20Poly1305 => {
            let cipher =
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::DecryptionFailed)?;
            cipher
                .decrypt(chacha20poly1305::Nonce::from_slice(nonce), payload)
                .map_err(|_| Error::DecryptionFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip_both_algorithms() {
        let key = [7u8; KEY_SIZE];
        for alg in [AeadAlgorithm::Aes256Gcm, AeadAlgorithm::ChaCha20Poly1305] {
            let (nonce, ct) = seal(alg, &key, b"aad", b"hello").unwrap();
            let pt = open(alg, &key, b"aad", &nonce, &ct).unwrap();
            assert_eq!(pt, b"hello");
        }
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [7u8; KEY_SIZE];
        let (nonce, mut ct) = seal(AeadAlgorithm::Aes256Gcm, &key, b"", b"hello").unwrap();
        ct[0] ^= 0x01;
        let err = open(AeadAlgorithm::Aes256Gcm, &key, b"", &nonce, &ct).unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed));
    }

    #[test]
    fn mismatched_aad_fails() {
        let key = [9u8; KEY_SIZE];
        let (nonce, ct) = seal(AeadAlgorithm::ChaCha20Poly1305, &key, b"a", b"data").unwrap();
        let err = open(AeadAlgorithm::ChaCha20Poly1305, &key, b"b", &nonce, &ct).unwrap_err();
        assert!(matches!(err, Error::DecryptionFailed));
    }
}
