//!
//! # 会话密钥
//!
//! 会话密钥由一次混合握手派生，带代数与有效期，轮换时整体替换。
//! 握手消息携带密钥确认值，响应方据此确认双方派生一致。
//!

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::common::aead::{KEY_SIZE, NONCE_SIZE};
use crate::error::{Error, Result};
use crate::hybrid::bundle::{HybridPublicBundle, X25519_KEY_SIZE};
use crate::registry::AlgorithmRegistry;

/// 密钥确认的域分隔前缀
const CONFIRMATION_DOMAIN: &[u8] = b"quantum-seal/confirm-v1";

/// 派生出的会话密钥
pub struct SessionKey {
    /// 轮换代数，只增不减
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl SessionKey {
    pub(crate) fn new(generation: u64, validity_secs: u64, key: Zeroizing<[u8; KEY_SIZE]>) -> Self {
        let created_at = Utc::now();
        let expires_at = created_at + Duration::seconds(validity_secs as i64);
        Self {
            generation,
            created_at,
            expires_at,
            key,
        }
    }

    pub(crate) fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不输出密钥字节
        f.debug_struct("SessionKey")
            .field("generation", &self.generation)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// 发起方产生、经外部传输交给响应方的握手消息
#[derive(Clone, Debug, PartialEq)]
pub struct SessionHandshake {
    pub algorithm: String,
    pub generation: u64,
    pub kem_ciphertext: Vec<u8>,
    pub classical_ephemeral_public: [u8; X25519_KEY_SIZE],
    /// `SHA-256(域前缀 ‖ K)`
    pub confirmation: [u8; 32],
}

impl SessionHandshake {
    /// 线格式：`[1B 算法标识][8B 代数 BE][KEM 密文][32B 临时公钥][32B 确认值]`
    pub fn to_bytes(&self, registry: &AlgorithmRegistry) -> Result<Vec<u8>> {
        let alg_id = registry.wire_id(&self.algorithm)?;
        let mut out =
            Vec::with_capacity(1 + 8 + self.kem_ciphertext.len() + X25519_KEY_SIZE + 32);
        out.push(alg_id);
        out.extend_from_slice(&self.generation.to_be_bytes());
        out.extend_from_slice(&self.kem_ciphertext);
        out.extend_from_slice(&self.classical_ephemeral_public);
        out.extend_from_slice(&self.confirmation);
        Ok(out)
    }

    pub fn from_bytes(registry: &AlgorithmRegistry, bytes: &[u8]) -> Result<Self> {
        let (&alg_id, rest) = bytes.split_first().ok_or_else(Self::malformed)?;
        let descriptor = registry
            .algorithm_by_wire_id(alg_id)
            .map_err(|_| Self::malformed())?;
        let kem_len = descriptor.ciphertext_size.ok_or_else(Self::malformed)?;
        if rest.len() != 8 + kem_len + X25519_KEY_SIZE + 32 {
            return Err(Self::malformed());
        }
        let (generation_bytes, rest) = rest.split_at(8);
        let (kem_ciphertext, rest) = rest.split_at(kem_len);
        let (classical, confirmation) = rest.split_at(X25519_KEY_SIZE);

        let generation = u64::from_be_bytes(
            generation_bytes.try_into().map_err(|_| Self::malformed())?,
        );
        let mut classical_arr = [0u8; X25519_KEY_SIZE];
        classical_arr.copy_from_slice(classical);
        let mut confirmation_arr = [0u8; 32];
        confirmation_arr.copy_from_slice(confirmation);

        Ok(Self {
            algorithm: descriptor.name.clone(),
            generation,
            kem_ciphertext: kem_ciphertext.to_vec(),
            classical_ephemeral_public: classical_arr,
            confirmation: confirmation_arr,
        })
    }

    fn malformed() -> Error {
        Error::InvalidArgument("malformed session handshake".to_string())
    }
}

/// 当前会话的完整状态，放在 `ArcSwapOption` 后面整体替换
pub(crate) struct SessionState {
    pub key: std::sync::Arc<SessionKey>,
    /// 发起方记住的对端公钥束，轮换时重新握手用；响应方为 None
    pub peer: Option<HybridPublicBundle>,
}

/// 由会话密钥计算确认值
pub(crate) fn confirmation_of(key: &[u8; KEY_SIZE]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(CONFIRMATION_DOMAIN);
    hasher.update(key);
    hasher.finalize().into()
}

/// 会话数据加密的附加认证数据（绑定代数）
pub(crate) fn session_aad(generation: u64) -> [u8; 8] {
    generation.to_be_bytes()
}

/// 会话数据线格式头部长度：`[8B 代数][1B AEAD 标识][12B nonce]`
pub(crate) const SESSION_HEADER_SIZE: usize = 8 + 1 + NONCE_SIZE;
