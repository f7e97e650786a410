//!
//! # 量子管理器
//!
//! 绑定注册表默认算法的便捷门面：生成、加解密、签名验签与随机数。
//! 加解密是纯后量子 KEM-DEM（共享密钥直接作为 AEAD 密钥），
//! 签名验签是纯后量子签名，不做混合。注册表没有默认算法时
//! 一律返回 `NotInitialized`。
//!

use std::sync::Arc;

use rand_core::{OsRng, RngCore};
use tracing::debug;
use zeroize::Zeroizing;

use crate::common::aead::{self, KEY_SIZE, NONCE_SIZE};
use crate::common::config::{AeadAlgorithm, CryptoConfig};
use crate::common::utils::ZeroizingVec;
use crate::error::{Error, Result};
use crate::provider::PqcProvider;
use crate::registry::{AlgorithmDescriptor, AlgorithmKind, AlgorithmRegistry};

pub struct QuantumManager {
    registry: Arc<AlgorithmRegistry>,
    provider: Arc<dyn PqcProvider>,
    aead: AeadAlgorithm,
}

impl QuantumManager {
    pub fn new(
        registry: Arc<AlgorithmRegistry>,
        provider: Arc<dyn PqcProvider>,
        crypto: &CryptoConfig,
    ) -> Self {
        Self {
            registry,
            provider,
            aead: crypto.aead,
        }
    }

    /// 默认算法的密钥对
    pub fn generate_key_pair(&self) -> Result<(Vec<u8>, ZeroizingVec)> {
        let name = self.registry.get_default()?;
        self.provider.generate_keypair(&name)
    }

    /// KEM-DEM 加密。
    /// 线格式：`[1B 算法标识][KEM 密文][1B AEAD 标识][12B nonce][AEAD 密文…]`
    pub fn encrypt(&self, public_key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let descriptor = self.resolve_kem()?;
        let (kem_ciphertext, shared) = self.provider.encapsulate(&descriptor.name, public_key)?;
        let key: Zeroizing<[u8; KEY_SIZE]> = Zeroizing::new(
            shared
                .as_slice()
                .try_into()
                .map_err(|_| Error::EncryptionFailed)?,
        );
        let (nonce, ciphertext) = aead::seal(self.aead, &key, &[], data)?;

        let mut out =
            Vec::with_capacity(2 + kem_ciphertext.len() + NONCE_SIZE + ciphertext.len());
        out.push(self.registry.wire_id(&descriptor.name)?);
        out.extend_from_slice(&kem_ciphertext);
        out.push(self.aead.wire_id());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, private_key: &[u8], bytes: &[u8]) -> Result<Vec<u8>> {
        // 默认算法未配置时先报 NotInitialized，再谈格式
        self.registry.get_default()?;
        let (&alg_id, rest) = bytes.split_first().ok_or(Error::DecryptionFailed)?;
        let descriptor = self
            .registry
            .algorithm_by_wire_id(alg_id)
            .map_err(|_| Error::DecryptionFailed)?;
        let kem_len = descriptor.ciphertext_size.ok_or(Error::DecryptionFailed)?;
        if rest.len() < kem_len + 1 + NONCE_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let (kem_ciphertext, rest) = rest.split_at(kem_len);
        let (&aead_id, rest) = rest.split_first().ok_or(Error::DecryptionFailed)?;
        let aead_alg = AeadAlgorithm::from_wire_id(aead_id).ok_or(Error::DecryptionFailed)?;
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        let shared = self
            .provider
            .decapsulate(&descriptor.name, kem_ciphertext, private_key)
            .map_err(|_| Error::DecryptionFailed)?;
        let key: Zeroizing<[u8; KEY_SIZE]> = Zeroizing::new(
            shared
                .as_slice()
                .try_into()
                .map_err(|_| Error::DecryptionFailed)?,
        );
        let nonce: [u8; NONCE_SIZE] = nonce.try_into().map_err(|_| Error::DecryptionFailed)?;
        aead::open(aead_alg, &key, &[], &nonce, ciphertext)
            .map_err(|_| Error::DecryptionFailed)
    }

    /// 纯后量子签名。密钥须属于解析出的签名算法。
    pub fn sign(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let descriptor = self.resolve_signature()?;
        self.provider.sign(&descriptor.name, message, private_key)
    }

    /// 验签失败统一 `SignatureInvalid`，不区分原因
    pub fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
        let descriptor = self.resolve_signature()?;
        self.provider
            .verify(&descriptor.name, message, signature, public_key)
    }

    /// 为签名生成配套密钥对（默认算法为 KEM 时用配套签名算法）
    pub fn generate_signing_key_pair(&self) -> Result<(Vec<u8>, ZeroizingVec)> {
        let descriptor = self.resolve_signature()?;
        self.provider.generate_keypair(&descriptor.name)
    }

    pub fn generate_random_bytes(&self, length: usize) -> Result<Vec<u8>> {
        self.registry.get_default()?;
        let mut out = vec![0u8; length];
        OsRng.fill_bytes(&mut out);
        Ok(out)
    }

    /// `[min, max]` 内均匀随机整数，拒绝采样去除模偏差
    pub fn generate_random_number(&self, min: u64, max: u64) -> Result<u64> {
        self.registry.get_default()?;
        if min > max {
            return Err(Error::InvalidArgument(format!(
                "min {min} greater than max {max}"
            )));
        }
        if min == 0 && max == u64::MAX {
            return Ok(OsRng.next_u64());
        }
        let range = max - min + 1;
        // 接受区间 [0, limit]，其长度是 range 的整数倍
        let limit = u64::MAX - ((u64::MAX % range + 1) % range);
        loop {
            let r = OsRng.next_u64();
            if r <= limit {
                return Ok(min + r % range);
            }
            debug!("rejection sampling retry");
        }
    }

    /// 当前解析出的签名算法名称
    pub fn signature_algorithm(&self) -> Result<String> {
        Ok(self.resolve_signature()?.name.clone())
    }

    fn resolve_kem(&self) -> Result<Arc<AlgorithmDescriptor>> {
        let descriptor = self.registry.get_info(&self.registry.get_default()?)?;
        match descriptor.kind {
            AlgorithmKind::Kem => Ok(descriptor),
            AlgorithmKind::Signature => self.registry.companion_kem(descriptor.security_level),
        }
    }

    /// 默认算法本身是签名方案就用它，否则取同安全等级的配套签名算法
    fn resolve_signature(&self) -> Result<Arc<AlgorithmDescriptor>> {
        let descriptor = self.registry.get_info(&self.registry.get_default()?)?;
        match descriptor.kind {
            AlgorithmKind::Signature => Ok(descriptor),
            AlgorithmKind::Kem => self
                .registry
                .companion_signature(descriptor.security_level),
        }
    }
}
