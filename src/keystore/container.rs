//!
//! # 静态加密容器
//!
//! 私钥在密钥库中始终以 AES-256-GCM 封装形态存在，封装密钥是
//! 由口令经 Argon2id 派生的主密钥。主密钥带纪元编号，轮换主密钥后
//! 旧纪元封装的记录仍可通过上一代主密钥解封，直到重新加密。
//!

use argon2::{Algorithm, Argon2, Params, Version};
use rand_core::{OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::common::aead::{self, KEY_SIZE, NONCE_SIZE};
use crate::common::config::{AeadAlgorithm, CryptoConfig};
use crate::common::utils::ZeroizingVec;
use crate::error::{Error, Result};

/// Argon2id 盐长度
pub(crate) const SALT_SIZE: usize = 16;
/// AES-256-GCM 认证标签长度
pub(crate) const TAG_SIZE: usize = 16;

/// 密钥库主密钥，由口令派生，随纪元轮换
pub struct MasterKey {
    epoch: u32,
    salt: [u8; SALT_SIZE],
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MasterKey {
    /// 以随机盐从口令派生主密钥
    pub fn derive(passphrase: &SecretString, config: &CryptoConfig, epoch: u32) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        Self::derive_with_salt(passphrase, config, epoch, salt)
    }

    /// 以既有盐重新派生（从持久化元数据恢复时使用）
    pub(crate) fn derive_with_salt(
        passphrase: &SecretString,
        config: &CryptoConfig,
        epoch: u32,
        salt: [u8; SALT_SIZE],
    ) -> Result<Self> {
        let params = Params::new(
            config.argon2_memory_cost,
            config.argon2_time_cost,
            config.argon2_parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| Error::InvalidArgument(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(passphrase.expose_secret().as_bytes(), &salt, key.as_mut())
            .map_err(|e| Error::InvalidArgument(format!("argon2 derive: {e}")))?;
        Ok(Self { epoch, salt, key })
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    pub(crate) fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }
}

/// 封装后的私钥材料。`epoch` 记录封装时的主密钥纪元，
/// 解封时据此选择当前或上一代主密钥。
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedMaterial {
    pub epoch: u32,
    nonce: Vec<u8>,
    ciphertext: ZeroizingVec,
}

impl EncryptedMaterial {
    /// 以 key_id 作为附加认证数据封装私钥，
    /// 封装结果无法在不同 key_id 之间挪用。
    pub(crate) fn wrap(master: &MasterKey, key_id: &str, plaintext: &[u8]) -> Result<Self> {
        let (nonce, ciphertext) = aead::seal(
            AeadAlgorithm::Aes256Gcm,
            &master.key,
            key_id.as_bytes(),
            plaintext,
        )?;
        Ok(Self {
            epoch: master.epoch,
            nonce: nonce.to_vec(),
            ciphertext: ZeroizingVec::new(ciphertext),
        })
    }

    pub(crate) fn unwrap_with(&self, master: &MasterKey, key_id: &str) -> Result<ZeroizingVec> {
        let nonce: [u8; NONCE_SIZE] = self
            .nonce
            .as_slice()
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        let plaintext = aead::open(
            AeadAlgorithm::Aes256Gcm,
            &master.key,
            key_id.as_bytes(),
            &nonce,
            &self.ciphertext,
        )?;
        Ok(ZeroizingVec::new(plaintext))
    }

    pub(crate) fn from_parts(epoch: u32, nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self {
            epoch,
            nonce,
            ciphertext: ZeroizingVec::new(ciphertext),
        }
    }

    pub(crate) fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    pub(crate) fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// 密文长度（含认证标签）
    pub fn ciphertext_len(&self) -> usize {
        self.ciphertext.len()
    }
}
