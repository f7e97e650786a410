//!
//! # 混合密文
//!
//! 线格式（单字节长度字段均不带长度前缀，尺寸由算法描述确定）：
//!
//! ```text
//! [1B 算法标识][KEM 密文][32B X25519 临时公钥][1B AEAD 标识][12B nonce][AEAD 密文…]
//! ```
//!

use crate::common::aead::NONCE_SIZE;
use crate::common::config::AeadAlgorithm;
use crate::error::{Error, Result};
use crate::hybrid::bundle::X25519_KEY_SIZE;
use crate::registry::AlgorithmRegistry;

/// 一次混合加密的全部输出，生成后不可变
#[derive(Clone, Debug, PartialEq)]
pub struct HybridCiphertext {
    pub algorithm: String,
    pub kem_ciphertext: Vec<u8>,
    pub classical_ephemeral_public: [u8; X25519_KEY_SIZE],
    pub aead: AeadAlgorithm,
    pub nonce: [u8; NONCE_SIZE],
    pub aead_ciphertext: Vec<u8>,
}

impl HybridCiphertext {
    pub fn to_bytes(&self, registry: &AlgorithmRegistry) -> Result<Vec<u8>> {
        let alg_id = registry.wire_id(&self.algorithm)?;
        let mut out = Vec::with_capacity(
            2 + self.kem_ciphertext.len()
                + X25519_KEY_SIZE
                + NONCE_SIZE
                + self.aead_ciphertext.len(),
        );
        out.push(alg_id);
        out.extend_from_slice(&self.kem_ciphertext);
        out.extend_from_slice(&self.classical_ephemeral_public);
        out.push(self.aead.wire_id());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.aead_ciphertext);
        Ok(out)
    }

    /// 解析线格式。解密路径上的任何格式问题统一映射为
    /// `DecryptionFailed`，不区分原因。
    pub fn from_bytes(registry: &AlgorithmRegistry, bytes: &[u8]) -> Result<Self> {
        let (&alg_id, rest) = bytes.split_first().ok_or(Error::DecryptionFailed)?;
        let descriptor = registry
            .algorithm_by_wire_id(alg_id)
            .map_err(|_| Error::DecryptionFailed)?;
        let kem_len = descriptor.ciphertext_size.ok_or(Error::DecryptionFailed)?;

        if rest.len() < kem_len + X25519_KEY_SIZE + 1 + NONCE_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let (kem_ciphertext, rest) = rest.split_at(kem_len);
        let (classical, rest) = rest.split_at(X25519_KEY_SIZE);
        let (&aead_id, rest) = rest.split_first().ok_or(Error::DecryptionFailed)?;
        let aead = AeadAlgorithm::from_wire_id(aead_id).ok_or(Error::DecryptionFailed)?;
        let (nonce, aead_ciphertext) = rest.split_at(NONCE_SIZE);

        let mut classical_ephemeral_public = [0u8; X25519_KEY_SIZE];
        classical_ephemeral_public.copy_from_slice(classical);
        let mut nonce_arr = [0u8; NONCE_SIZE];
        nonce_arr.copy_from_slice(nonce);

        Ok(Self {
            algorithm: descriptor.name.clone(),
            kem_ciphertext: kem_ciphertext.to_vec(),
            classical_ephemeral_public,
            aead,
            nonce: nonce_arr,
            aead_ciphertext: aead_ciphertext.to_vec(),
        })
    }
}
