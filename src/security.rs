//!
//! # 量子安全管理器
//!
//! SDK 其余部分调用的唯一边界：组合注册表、提供者、密钥库、
//! 混合引擎与量子管理器，在委托前做输入校验，并维护
//! 交易与签名密钥的绑定关系。
//!

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use secrecy::SecretString;
use serde_json::Value;
use tracing::{debug, info};

use crate::common::config::ConfigFile;
use crate::error::{Error, Result};
use crate::hybrid::{
    HybridEncryptionEngine, HybridPrivateBundle, HybridPublicBundle, SessionHandshake,
};
use crate::keystore::{KeyInfo, KeyMaterial, KeyStore, KeyValueStore};
use crate::manager::QuantumManager;
use crate::provider::{PqCryptoProvider, PqcProvider};
use crate::registry::{AlgorithmDescriptor, AlgorithmRegistry};

/// 单次加解密负载上限
const MAX_DATA_SIZE: usize = 16 * 1024 * 1024;
/// 签名与密文的结构上限（防御性，正常值远小于此）
const MAX_ENVELOPE_SIZE: usize = MAX_DATA_SIZE + 64 * 1024;

/// 已登记的交易：签名与签名密钥的绑定
struct TransactionRecord {
    payload: Vec<u8>,
    signature: Vec<u8>,
    key_id: String,
}

pub struct QuantumSecurityManager {
    registry: Arc<AlgorithmRegistry>,
    keystore: KeyStore,
    engine: HybridEncryptionEngine,
    manager: QuantumManager,
    transactions: DashMap<String, TransactionRecord>,
    max_key_id_length: usize,
    max_metadata_bytes: usize,
}

impl QuantumSecurityManager {
    /// 纯内存实例
    pub fn new(config: ConfigFile, passphrase: &SecretString) -> Result<Self> {
        Self::build(config, passphrase, None)
    }

    /// 带持久化后端的实例
    pub fn with_backend(
        config: ConfigFile,
        passphrase: &SecretString,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        Self::build(config, passphrase, Some(backend))
    }

    fn build(
        config: ConfigFile,
        passphrase: &SecretString,
        backend: Option<Arc<dyn KeyValueStore>>,
    ) -> Result<Self> {
        let registry = Arc::new(AlgorithmRegistry::without_default());
        registry.set_default(&config.crypto.default_algorithm)?;
        let provider: Arc<dyn PqcProvider> = Arc::new(PqCryptoProvider::new());

        let keystore = match backend {
            Some(backend) => KeyStore::with_backend(
                Arc::clone(&registry),
                Arc::clone(&provider),
                config.store.clone(),
                config.crypto.clone(),
                passphrase,
                backend,
            )?,
            None => KeyStore::new(
                Arc::clone(&registry),
                Arc::clone(&provider),
                config.store.clone(),
                config.crypto.clone(),
                passphrase,
            )?,
        };
        let engine = HybridEncryptionEngine::new(
            Arc::clone(&registry),
            Arc::clone(&provider),
            &config.crypto,
            config.session.clone(),
        );
        let manager = QuantumManager::new(Arc::clone(&registry), provider, &config.crypto);

        info!(
            default_algorithm = %config.crypto.default_algorithm,
            "quantum security manager initialized"
        );
        Ok(Self {
            registry,
            keystore,
            engine,
            manager,
            transactions: DashMap::new(),
            max_key_id_length: config.store.max_key_id_length,
            max_metadata_bytes: config.store.max_metadata_bytes,
        })
    }

    // --- 密钥管理 ---

    pub fn generate_quantum_key(
        &self,
        key_id: &str,
        algorithm: &str,
        metadata: &str,
        access_levels: BTreeSet<String>,
        tags: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<u8>> {
        self.validate_key_id(key_id)?;
        self.validate_metadata(metadata)?;
        self.keystore
            .generate_key(key_id, algorithm, metadata, access_levels, tags, expires_at)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn store_quantum_key(
        &self,
        key_id: &str,
        algorithm: &str,
        material: KeyMaterial,
        metadata: &str,
        access_levels: BTreeSet<String>,
        tags: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.validate_key_id(key_id)?;
        self.validate_metadata(metadata)?;
        self.keystore.store_key(
            key_id,
            algorithm,
            material,
            metadata,
            access_levels,
            tags,
            expires_at,
        )
    }

    pub fn retrieve_quantum_key(&self, key_id: &str, access_level: &str) -> Result<KeyMaterial> {
        self.validate_key_id(key_id)?;
        self.keystore.retrieve_key(key_id, access_level)
    }

    pub fn rotate_quantum_key(&self, key_id: &str) -> Result<u64> {
        self.validate_key_id(key_id)?;
        self.keystore.rotate_key(key_id)
    }

    pub fn delete_quantum_key(&self, key_id: &str) -> Result<()> {
        self.validate_key_id(key_id)?;
        self.keystore.delete_key(key_id)
    }

    pub fn revoke_quantum_key(&self, key_id: &str) -> Result<()> {
        self.validate_key_id(key_id)?;
        self.keystore.revoke_key(key_id)
    }

    pub fn get_key_info(&self, key_id: &str) -> Result<KeyInfo> {
        self.validate_key_id(key_id)?;
        self.keystore.get_key_metadata(key_id)
    }

    /// 重设密钥过期时间，`None` 取消过期
    pub fn set_key_expiration(
        &self,
        key_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.validate_key_id(key_id)?;
        self.keystore.set_key_expiration(key_id, expires_at)
    }

    pub fn cleanup_expired_keys(&self) -> Result<usize> {
        self.keystore.cleanup_expired_keys()
    }

    // --- 数据加解密（混合引擎）---

    pub fn generate_hybrid_key_pair(&self) -> Result<(HybridPublicBundle, HybridPrivateBundle)> {
        self.engine.generate_key_pair()
    }

    /// 混合加密，返回线格式字节
    pub fn encrypt_data(&self, peer: &HybridPublicBundle, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > MAX_DATA_SIZE {
            return Err(Error::InvalidArgument(format!(
                "payload exceeds {MAX_DATA_SIZE} bytes"
            )));
        }
        let ciphertext = self.engine.encrypt(peer, data)?;
        ciphertext.to_bytes(&self.registry)
    }

    pub fn decrypt_data(&self, private: &HybridPrivateBundle, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.is_empty() || bytes.len() > MAX_ENVELOPE_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let ciphertext = crate::hybrid::HybridCiphertext::from_bytes(&self.registry, bytes)?;
        self.engine.decrypt(private, &ciphertext)
    }

    // --- 签名 ---

    pub fn sign_data(&self, private_key: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        if message.len() > MAX_DATA_SIZE {
            return Err(Error::InvalidArgument(format!(
                "message exceeds {MAX_DATA_SIZE} bytes"
            )));
        }
        self.manager.sign(private_key, message)
    }

    /// 结构检查后验签；签名不匹配返回 `Ok(false)` 而不是错误
    pub fn verify_signature(
        &self,
        public_key: &[u8],
        message: &[u8],
        signature: &[u8],
    ) -> Result<bool> {
        if signature.is_empty() || signature.len() > MAX_ENVELOPE_SIZE {
            return Ok(false);
        }
        match self.manager.verify(public_key, message, signature) {
            Ok(()) => Ok(true),
            Err(Error::SignatureInvalid) => Ok(false),
            Err(e) => Err(e),
        }
    }

    // --- 交易 ---

    /// 登记一笔已签名交易，绑定到密钥库中的签名密钥
    pub fn register_transaction(
        &self,
        transaction_id: &str,
        payload: &[u8],
        signature: &[u8],
        key_id: &str,
    ) -> Result<()> {
        self.validate_key_id(key_id)?;
        if transaction_id.is_empty() {
            return Err(Error::InvalidArgument("empty transaction id".to_string()));
        }
        if signature.is_empty() {
            return Err(Error::InvalidArgument("empty signature".to_string()));
        }
        // 绑定的密钥必须存在
        self.keystore.get_public_key(key_id)?;

        use dashmap::mapref::entry::Entry;
        match self.transactions.entry(transaction_id.to_string()) {
            Entry::Occupied(_) => Err(Error::InvalidArgument(format!(
                "transaction already registered: {transaction_id}"
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(TransactionRecord {
                    payload: payload.to_vec(),
                    signature: signature.to_vec(),
                    key_id: key_id.to_string(),
                });
                debug!(transaction_id, key_id, "transaction registered");
                Ok(())
            }
        }
    }

    /// 签名与金额都通过才算有效
    pub fn verify_transaction(&self, transaction_id: &str) -> Result<bool> {
        Ok(self.verify_transaction_signature(transaction_id)?
            && self.verify_transaction_amount(transaction_id)?)
    }

    /// 交易签名是否出自绑定密钥
    pub fn verify_transaction_signature(&self, transaction_id: &str) -> Result<bool> {
        let (payload, signature, key_id) = {
            let record = self.get_transaction(transaction_id)?;
            (
                record.payload.clone(),
                record.signature.clone(),
                record.key_id.clone(),
            )
        };
        let public_key = self.keystore.get_public_key(&key_id)?;
        self.verify_signature(&public_key, &payload, &signature)
    }

    /// 交易负载须是带正整数 `amount` 字段的 JSON 对象
    pub fn verify_transaction_amount(&self, transaction_id: &str) -> Result<bool> {
        let payload = self.get_transaction(transaction_id)?.payload.clone();
        let value: Value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(_) => return Ok(false),
        };
        let amount = match value.get("amount") {
            Some(amount) => amount,
            None => return Ok(false),
        };
        Ok(amount.as_u64().map(|n| n > 0).unwrap_or(false))
    }

    fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, TransactionRecord>> {
        self.transactions.get(transaction_id).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown transaction: {transaction_id}"))
        })
    }

    // --- 密钥交换 ---

    /// 发起方会话握手
    pub fn perform_key_exchange(&self, peer: &HybridPublicBundle) -> Result<SessionHandshake> {
        self.engine.establish_session(peer)
    }

    /// 响应方处理握手
    pub fn accept_key_exchange(
        &self,
        private: &HybridPrivateBundle,
        handshake: &SessionHandshake,
    ) -> Result<()> {
        self.engine.accept_session(private, handshake)
    }

    /// 当前是否有未过期的会话
    pub fn verify_key_exchange(&self) -> bool {
        self.engine.get_session_key().is_ok()
    }

    // --- 状态查询 ---

    /// 默认算法是否属于后量子目录（目录只收后量子算法，默认已配置即为真）
    pub fn is_quantum_resistant(&self) -> bool {
        self.registry
            .get_default()
            .map(|name| self.registry.is_available(&name))
            .unwrap_or(false)
    }

    pub fn get_quantum_algorithm(&self) -> Result<String> {
        self.registry.get_default()
    }

    pub fn get_available_algorithms(&self) -> Vec<String> {
        self.registry.list_available()
    }

    pub fn get_algorithm_info(&self, name: &str) -> Result<Arc<AlgorithmDescriptor>> {
        self.registry.get_info(name)
    }

    pub fn set_default_algorithm(&self, name: &str) -> Result<()> {
        self.registry.set_default(name)
    }

    // --- 组件访问 ---

    pub fn key_store(&self) -> &KeyStore {
        &self.keystore
    }

    pub fn hybrid_engine(&self) -> &HybridEncryptionEngine {
        &self.engine
    }

    pub fn quantum_manager(&self) -> &QuantumManager {
        &self.manager
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        &self.registry
    }

    // --- 校验 ---

    fn validate_key_id(&self, key_id: &str) -> Result<()> {
        if key_id.is_empty() || key_id.len() > self.max_key_id_length {
            return Err(Error::InvalidArgument(format!(
                "key id must be 1..={} bytes",
                self.max_key_id_length
            )));
        }
        if !key_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
        {
            return Err(Error::InvalidArgument(format!(
                "key id contains invalid characters: {key_id}"
            )));
        }
        Ok(())
    }

    fn validate_metadata(&self, metadata: &str) -> Result<()> {
        if metadata.len() > self.max_metadata_bytes {
            return Err(Error::InvalidArgument(format!(
                "metadata exceeds {} bytes",
                self.max_metadata_bytes
            )));
        }
        if metadata.contains('\0') {
            return Err(Error::InvalidArgument(
                "metadata contains NUL bytes".to_string(),
            ));
        }
        Ok(())
    }
}
