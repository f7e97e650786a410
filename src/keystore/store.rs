//!
//! # 密钥库核心
//!
//! 所有记录放在 `DashMap<String, Arc<KeyRecord>>` 中，按 key_id 分片。
//! 修改走复制写入：在锁外构建完整的新记录，再在分片锁下整体替换，
//! 轮换失败时把原记录换回去。取用检查顺序固定：
//! 存在 → 过期 → 状态 → 访问级别 → 解封。
//!

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::common::config::{CryptoConfig, StorePolicy};
use crate::error::{Error, Result};
use crate::keystore::backend::KeyValueStore;
use crate::keystore::container::{EncryptedMaterial, MasterKey, SALT_SIZE, TAG_SIZE};
use crate::keystore::record::{KeyInfo, KeyMaterial, KeyMaterialAtRest, KeyRecord, KeyState};
use crate::provider::PqcProvider;
use crate::registry::AlgorithmRegistry;

/// 持久层中记录信封的键前缀
const RECORD_PREFIX: &str = "key/";
/// 主密钥元数据（纪元与盐）的持久层键
const MASTER_META_KEY: &str = "master";

struct MasterState {
    current: MasterKey,
    /// 上一纪元的主密钥，供尚未重加密的记录解封
    previous: Option<MasterKey>,
}

/// 受管密钥库
pub struct KeyStore {
    registry: Arc<AlgorithmRegistry>,
    provider: Arc<dyn PqcProvider>,
    policy: StorePolicy,
    crypto: CryptoConfig,
    keys: DashMap<String, Arc<KeyRecord>>,
    master: RwLock<MasterState>,
    backend: Option<Arc<dyn KeyValueStore>>,
}

impl KeyStore {
    /// 纯内存密钥库
    pub fn new(
        registry: Arc<AlgorithmRegistry>,
        provider: Arc<dyn PqcProvider>,
        policy: StorePolicy,
        crypto: CryptoConfig,
        passphrase: &SecretString,
    ) -> Result<Self> {
        let current = MasterKey::derive(passphrase, &crypto, 0)?;
        Ok(Self {
            registry,
            provider,
            policy,
            crypto,
            keys: DashMap::new(),
            master: RwLock::new(MasterState {
                current,
                previous: None,
            }),
            backend: None,
        })
    }

    /// 带持久化后端的密钥库。若后端中已有主密钥元数据与记录信封，
    /// 以相同口令恢复；否则写入新的主密钥元数据。
    pub fn with_backend(
        registry: Arc<AlgorithmRegistry>,
        provider: Arc<dyn PqcProvider>,
        policy: StorePolicy,
        crypto: CryptoConfig,
        passphrase: &SecretString,
        backend: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let current = match backend.get(MASTER_META_KEY)? {
            Some(bytes) => {
                let meta: StoredMaster = serde_json::from_slice(&bytes)?;
                let salt: [u8; SALT_SIZE] = BASE64
                    .decode(&meta.salt)?
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::InvalidKeyMaterial(MASTER_META_KEY.to_string()))?;
                MasterKey::derive_with_salt(passphrase, &crypto, meta.epoch, salt)?
            }
            None => {
                let master = MasterKey::derive(passphrase, &crypto, 0)?;
                backend.put(MASTER_META_KEY, &serde_json::to_vec(&StoredMaster::of(&master))?)?;
                master
            }
        };

        let store = Self {
            registry,
            provider,
            policy,
            crypto,
            keys: DashMap::new(),
            master: RwLock::new(MasterState {
                current,
                previous: None,
            }),
            backend: Some(backend),
        };
        store.hydrate()?;
        Ok(store)
    }

    /// 从后端载入全部记录信封
    fn hydrate(&self) -> Result<()> {
        let backend = match &self.backend {
            Some(backend) => backend,
            None => return Ok(()),
        };
        let mut loaded = 0usize;
        for key in backend.keys()? {
            let Some(key_id) = key.strip_prefix(RECORD_PREFIX) else {
                continue;
            };
            if let Some(bytes) = backend.get(&key)? {
                let record = decode_record(&bytes)?;
                if record.key_id != key_id {
                    return Err(Error::InvalidKeyMaterial(key_id.to_string()));
                }
                self.keys.insert(record.key_id.clone(), Arc::new(record));
                loaded += 1;
            }
        }
        debug!(loaded, "key store hydrated from backend");
        Ok(())
    }

    // --- 基本操作 ---

    /// 存入外部提供的密钥材料，`state = Active`，`generation = 0`
    #[allow(clippy::too_many_arguments)]
    pub fn store_key(
        &self,
        key_id: &str,
        algorithm: &str,
        material: KeyMaterial,
        metadata: &str,
        access_levels: BTreeSet<String>,
        tags: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.check_key_id(key_id)?;
        self.check_metadata(metadata)?;
        let descriptor = self.registry.get_info(algorithm)?;
        if material.public_key.len() != descriptor.public_key_size
            || material.private_key.len() != descriptor.secret_key_size
        {
            return Err(Error::InvalidKeyMaterial(key_id.to_string()));
        }

        let wrapped = {
            let master = self.master_state();
            EncryptedMaterial::wrap(&master.current, key_id, &material.private_key)?
        };
        let record = Arc::new(KeyRecord {
            key_id: key_id.to_string(),
            algorithm: algorithm.to_string(),
            material: KeyMaterialAtRest {
                public_key: material.public_key,
                wrapped_private: wrapped,
            },
            metadata: metadata.to_string(),
            created_at: Utc::now(),
            expires_at,
            last_access: Default::default(),
            access_levels,
            tags,
            generation: 0,
            state: KeyState::Active,
        });

        match self.keys.entry(key_id.to_string()) {
            Entry::Occupied(_) => return Err(Error::KeyAlreadyExists(key_id.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&record));
            }
        }
        self.persist(&record)?;
        info!(key_id, algorithm, "key stored");
        Ok(())
    }

    /// 生成并存入一把新密钥，返回公钥
    #[allow(clippy::too_many_arguments)]
    pub fn generate_key(
        &self,
        key_id: &str,
        algorithm: &str,
        metadata: &str,
        access_levels: BTreeSet<String>,
        tags: BTreeSet<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Vec<u8>> {
        let (public_key, private_key) = self.provider.generate_keypair(algorithm)?;
        let material = KeyMaterial {
            public_key: public_key.clone(),
            private_key,
        };
        self.store_key(
            key_id,
            algorithm,
            material,
            metadata,
            access_levels,
            tags,
            expires_at,
        )?;
        Ok(public_key)
    }

    /// 取用密钥材料。检查顺序固定：存在 → 过期 → 状态 → 访问级别 → 解封。
    pub fn retrieve_key(&self, key_id: &str, access_level: &str) -> Result<KeyMaterial> {
        let record = self.get_record(key_id)?;

        if record.is_expired_at(Utc::now()) {
            self.mark_expired(&record);
            return Err(Error::KeyExpired(key_id.to_string()));
        }
        match record.state {
            KeyState::Active | KeyState::Rotating => {}
            KeyState::Expired => return Err(Error::KeyExpired(key_id.to_string())),
            KeyState::Revoked => return Err(Error::AccessDenied(key_id.to_string())),
        }
        if self.policy.enforce_access_control && !record.access_levels.contains(access_level) {
            return Err(Error::AccessDenied(key_id.to_string()));
        }

        let private_key = self.unwrap_private(&record)?;
        record.touch();
        Ok(KeyMaterial {
            public_key: record.material.public_key.clone(),
            private_key,
        })
    }

    /// 公钥查询不做访问级别检查
    pub fn get_public_key(&self, key_id: &str) -> Result<Vec<u8>> {
        Ok(self.get_record(key_id)?.material.public_key.clone())
    }

    /// 删除记录。封装材料随最后一个引用释放时清零。
    pub fn delete_key(&self, key_id: &str) -> Result<()> {
        if self.keys.remove(key_id).is_none() {
            return Err(Error::KeyNotFound(key_id.to_string()));
        }
        self.unpersist(key_id)?;
        info!(key_id, "key deleted");
        Ok(())
    }

    /// 只替换非密码学字段
    pub fn update_key(
        &self,
        key_id: &str,
        metadata: &str,
        access_levels: BTreeSet<String>,
        tags: BTreeSet<String>,
    ) -> Result<()> {
        self.check_metadata(metadata)?;
        let updated = self.swap_record(key_id, |record| {
            let mut next = record.duplicate();
            next.metadata = metadata.to_string();
            next.access_levels = access_levels.clone();
            next.tags = tags.clone();
            Ok(next)
        })?;
        self.persist(&updated)?;
        debug!(key_id, "key metadata updated");
        Ok(())
    }

    pub fn get_key_metadata(&self, key_id: &str) -> Result<KeyInfo> {
        Ok(self.get_record(key_id)?.info())
    }

    pub fn add_key_access_level(&self, key_id: &str, level: &str) -> Result<()> {
        let updated = self.swap_record(key_id, |record| {
            let mut next = record.duplicate();
            next.access_levels.insert(level.to_string());
            Ok(next)
        })?;
        self.persist(&updated)
    }

    pub fn remove_key_access_level(&self, key_id: &str, level: &str) -> Result<()> {
        let updated = self.swap_record(key_id, |record| {
            let mut next = record.duplicate();
            next.access_levels.remove(level);
            Ok(next)
        })?;
        self.persist(&updated)
    }

    pub fn count_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn list_key_ids(&self) -> Vec<String> {
        self.keys.iter().map(|e| e.key().clone()).collect()
    }

    // --- 生命周期 ---

    /// 轮换密钥：保留 key_id、访问级别与标签，替换材料并递增 generation。
    /// 新记录完全在分片锁外构建；失败时换回原记录，材料保持可用。
    /// 换入是条件式的：只在开始时放置的 Rotating 标记仍在原位时生效，
    /// 轮换期间被删除或过期的记录不会被复活。
    pub fn rotate_key(&self, key_id: &str) -> Result<u64> {
        // 1. 标记 Rotating，拿到标记前的记录作为回退基底
        let (prior, marker) = match self.keys.entry(key_id.to_string()) {
            Entry::Vacant(_) => return Err(Error::KeyNotFound(key_id.to_string())),
            Entry::Occupied(mut occupied) => {
                let record = Arc::clone(occupied.get());
                if record.is_expired_at(Utc::now()) || record.state == KeyState::Expired {
                    return Err(Error::KeyExpired(key_id.to_string()));
                }
                match record.state {
                    KeyState::Revoked => return Err(Error::AccessDenied(key_id.to_string())),
                    KeyState::Rotating => {
                        return Err(Error::InvalidArgument(format!(
                            "rotation already in progress for key: {key_id}"
                        )))
                    }
                    KeyState::Active | KeyState::Expired => {}
                }
                let marker = Arc::new(record.with_state(KeyState::Rotating));
                occupied.insert(Arc::clone(&marker));
                (record, marker)
            }
        };

        // 2. 锁外生成替换记录
        let replacement = self.build_rotated(&prior);

        // 3. 条件换入新记录；失败则尝试恢复原记录
        match replacement {
            Ok(next) => {
                let next = Arc::new(next);
                self.commit_rotation(key_id, &marker, Arc::clone(&next))?;
                self.persist(&next)?;
                info!(key_id, generation = next.generation, "key rotated");
                Ok(next.generation)
            }
            Err(e) => {
                match self.commit_rotation(key_id, &marker, prior) {
                    Ok(()) => warn!(key_id, error = %e, "key rotation failed, prior material kept"),
                    Err(_) => warn!(key_id, error = %e, "key rotation failed, record gone meanwhile"),
                }
                Err(e)
            }
        }
    }

    /// 只在 `marker` 仍是映射中的当前记录时换入 `next`。
    /// 标记不在原位说明记录在轮换期间被删除，或被惰性过期替换。
    fn commit_rotation(
        &self,
        key_id: &str,
        marker: &Arc<KeyRecord>,
        next: Arc<KeyRecord>,
    ) -> Result<()> {
        match self.keys.entry(key_id.to_string()) {
            Entry::Vacant(_) => Err(Error::KeyNotFound(key_id.to_string())),
            Entry::Occupied(mut occupied) => {
                if !Arc::ptr_eq(occupied.get(), marker) {
                    return Err(Error::KeyExpired(key_id.to_string()));
                }
                occupied.insert(next);
                Ok(())
            }
        }
    }

    fn build_rotated(&self, prior: &KeyRecord) -> Result<KeyRecord> {
        let (public_key, private_key) = self.provider.generate_keypair(&prior.algorithm)?;
        let wrapped = {
            let master = self.master_state();
            EncryptedMaterial::wrap(&master.current, &prior.key_id, &private_key)?
        };
        let mut next = prior.duplicate();
        next.material = KeyMaterialAtRest {
            public_key,
            wrapped_private: wrapped,
        };
        next.generation = prior.generation + 1;
        next.state = KeyState::Active;
        Ok(next)
    }

    /// 重设过期时间，`None` 取消过期。
    /// 已惰性转入 Expired 的记录在新期限内重新变为 Active。
    pub fn set_key_expiration(
        &self,
        key_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let updated = self.swap_record(key_id, |record| {
            if record.state == KeyState::Revoked {
                return Err(Error::AccessDenied(key_id.to_string()));
            }
            let mut next = record.duplicate();
            next.expires_at = expires_at;
            if next.state == KeyState::Expired && !next.is_expired_at(Utc::now()) {
                next.state = KeyState::Active;
            }
            Ok(next)
        })?;
        self.persist(&updated)?;
        debug!(key_id, "key expiration updated");
        Ok(())
    }

    /// 撤销密钥。终态，之后只能删除。
    pub fn revoke_key(&self, key_id: &str) -> Result<()> {
        let updated = self.swap_record(key_id, |record| Ok(record.with_state(KeyState::Revoked)))?;
        self.persist(&updated)?;
        info!(key_id, "key revoked");
        Ok(())
    }

    /// 硬删除所有已过期的记录，返回删除数量
    pub fn cleanup_expired_keys(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = self
            .keys
            .iter()
            .filter(|e| e.is_expired_at(now) || e.state == KeyState::Expired)
            .map(|e| e.key_id.clone())
            .collect();

        let mut removed = 0usize;
        for key_id in expired {
            let gone = self
                .keys
                .remove_if(&key_id, |_, r| {
                    r.is_expired_at(now) || r.state == KeyState::Expired
                })
                .is_some();
            if gone {
                self.unpersist(&key_id)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "expired keys cleaned up");
        }
        Ok(removed)
    }

    pub fn is_key_expired(&self, key_id: &str) -> Result<bool> {
        let record = self.get_record(key_id)?;
        Ok(record.state == KeyState::Expired || record.is_expired_at(Utc::now()))
    }

    /// 结构校验：存储材料的长度是否符合算法描述。不验证密码学强度。
    pub fn validate_key(&self, key_id: &str) -> Result<bool> {
        let record = self.get_record(key_id)?;
        let descriptor = self.registry.get_info(&record.algorithm)?;
        Ok(record.material.public_key.len() == descriptor.public_key_size
            && record.material.wrapped_private.ciphertext_len()
                == descriptor.secret_key_size + TAG_SIZE)
    }

    // --- 主密钥轮换 ---

    /// 换用新口令派生下一纪元主密钥。旧纪元封装的记录仍可读，
    /// 直到逐个 `reencrypt_key`。返回新纪元编号。
    pub fn rotate_master(&self, new_passphrase: &SecretString) -> Result<u32> {
        let meta = {
            let mut state = match self.master.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let next =
                MasterKey::derive(new_passphrase, &self.crypto, state.current.epoch() + 1)?;
            let meta = StoredMaster::of(&next);
            state.previous = Some(std::mem::replace(&mut state.current, next));
            meta
        };
        if let Some(backend) = &self.backend {
            backend.put(MASTER_META_KEY, &serde_json::to_vec(&meta)?)?;
        }
        info!(epoch = meta.epoch, "master key rotated");
        Ok(meta.epoch)
    }

    /// 把记录重新封装到当前主密钥纪元。密钥对与 generation 不变。
    pub fn reencrypt_key(&self, key_id: &str) -> Result<()> {
        let record = self.get_record(key_id)?;
        let rewrapped = {
            let master = self.master_state();
            if record.material.wrapped_private.epoch == master.current.epoch() {
                return Ok(());
            }
            let private = Self::unwrap_with_state(&master, &record)?;
            EncryptedMaterial::wrap(&master.current, key_id, &private)?
        };
        let updated = self.swap_record(key_id, |current| {
            // 轮换可能已替换材料；只在纪元仍旧时重封
            if current.material.wrapped_private.epoch == rewrapped.epoch {
                return Ok(current.duplicate());
            }
            let mut next = current.duplicate();
            next.material.wrapped_private = rewrapped.clone();
            Ok(next)
        })?;
        self.persist(&updated)?;
        debug!(key_id, "key re-encrypted to current master epoch");
        Ok(())
    }

    // --- 内部工具 ---

    fn get_record(&self, key_id: &str) -> Result<Arc<KeyRecord>> {
        self.keys
            .get(key_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }

    /// 在分片锁下用闭包结果替换记录。
    /// 轮换进行中的记录拒绝修改，否则修改会在换入时被覆盖。
    fn swap_record(
        &self,
        key_id: &str,
        build: impl Fn(&KeyRecord) -> Result<KeyRecord>,
    ) -> Result<Arc<KeyRecord>> {
        match self.keys.entry(key_id.to_string()) {
            Entry::Vacant(_) => Err(Error::KeyNotFound(key_id.to_string())),
            Entry::Occupied(mut occupied) => {
                if occupied.get().state == KeyState::Rotating {
                    return Err(Error::InvalidArgument(format!(
                        "rotation in progress for key: {key_id}"
                    )));
                }
                let next = Arc::new(build(occupied.get())?);
                occupied.insert(Arc::clone(&next));
                Ok(next)
            }
        }
    }

    fn mark_expired(&self, record: &KeyRecord) {
        self.keys.alter(&record.key_id, |_, current| {
            if current.generation == record.generation && current.state != KeyState::Expired {
                Arc::new(current.with_state(KeyState::Expired))
            } else {
                current
            }
        });
        // 惰性转移也要落盘，否则重开后记录又回到 Active
        if let Some(current) = self.keys.get(&record.key_id) {
            if current.state == KeyState::Expired {
                if let Err(e) = self.persist(current.value()) {
                    warn!(key_id = %record.key_id, error = %e, "failed to persist expired state");
                }
            }
        }
        debug!(key_id = %record.key_id, "key marked expired");
    }

    fn master_state(&self) -> RwLockReadGuard<'_, MasterState> {
        match self.master.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn unwrap_private(
        &self,
        record: &KeyRecord,
    ) -> Result<crate::common::utils::ZeroizingVec> {
        Self::unwrap_with_state(&self.master_state(), record)
    }

    fn unwrap_with_state(
        state: &MasterState,
        record: &KeyRecord,
    ) -> Result<crate::common::utils::ZeroizingVec> {
        let wrapped = &record.material.wrapped_private;
        let master = if wrapped.epoch == state.current.epoch() {
            &state.current
        } else {
            match &state.previous {
                Some(previous) if previous.epoch() == wrapped.epoch => previous,
                _ => return Err(Error::InvalidKeyMaterial(record.key_id.clone())),
            }
        };
        wrapped.unwrap_with(master, &record.key_id)
    }

    fn check_key_id(&self, key_id: &str) -> Result<()> {
        if key_id.is_empty() || key_id.len() > self.policy.max_key_id_length {
            return Err(Error::InvalidArgument(format!(
                "key id must be 1..={} bytes",
                self.policy.max_key_id_length
            )));
        }
        Ok(())
    }

    fn check_metadata(&self, metadata: &str) -> Result<()> {
        if metadata.len() > self.policy.max_metadata_bytes {
            return Err(Error::InvalidArgument(format!(
                "metadata exceeds {} bytes",
                self.policy.max_metadata_bytes
            )));
        }
        Ok(())
    }

    fn persist(&self, record: &KeyRecord) -> Result<()> {
        if let Some(backend) = &self.backend {
            let key = format!("{RECORD_PREFIX}{}", record.key_id);
            backend.put(&key, &encode_record(record)?)?;
        }
        Ok(())
    }

    fn unpersist(&self, key_id: &str) -> Result<()> {
        if let Some(backend) = &self.backend {
            backend.remove(&format!("{RECORD_PREFIX}{key_id}"))?;
        }
        Ok(())
    }
}

// --- 持久化信封（JSON，材料 base64，时间戳 RFC 3339）---

#[derive(Serialize, Deserialize)]
struct StoredMaster {
    epoch: u32,
    salt: String,
}

impl StoredMaster {
    fn of(master: &MasterKey) -> Self {
        Self {
            epoch: master.epoch(),
            salt: BASE64.encode(master.salt()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct StoredMaterial {
    epoch: u32,
    nonce: String,
    ciphertext: String,
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    key_id: String,
    algorithm: String,
    public_key: String,
    private_wrapped: StoredMaterial,
    metadata: String,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    access_levels: BTreeSet<String>,
    tags: BTreeSet<String>,
    generation: u64,
    state: KeyState,
}

fn encode_record(record: &KeyRecord) -> Result<Vec<u8>> {
    let wrapped = &record.material.wrapped_private;
    let envelope = StoredRecord {
        key_id: record.key_id.clone(),
        algorithm: record.algorithm.clone(),
        public_key: BASE64.encode(&record.material.public_key),
        private_wrapped: StoredMaterial {
            epoch: wrapped.epoch,
            nonce: BASE64.encode(wrapped.nonce()),
            ciphertext: BASE64.encode(wrapped.ciphertext()),
        },
        metadata: record.metadata.clone(),
        created_at: record.created_at,
        expires_at: record.expires_at,
        access_levels: record.access_levels.clone(),
        tags: record.tags.clone(),
        generation: record.generation,
        state: record.state,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn decode_record(bytes: &[u8]) -> Result<KeyRecord> {
    let envelope: StoredRecord = serde_json::from_slice(bytes)?;
    Ok(KeyRecord {
        key_id: envelope.key_id,
        algorithm: envelope.algorithm,
        material: KeyMaterialAtRest {
            public_key: BASE64.decode(&envelope.public_key)?,
            wrapped_private: EncryptedMaterial::from_parts(
                envelope.private_wrapped.epoch,
                BASE64.decode(&envelope.private_wrapped.nonce)?,
                BASE64.decode(&envelope.private_wrapped.ciphertext)?,
            ),
        },
        metadata: envelope.metadata,
        created_at: envelope.created_at,
        expires_at: envelope.expires_at,
        last_access: Default::default(),
        access_levels: envelope.access_levels,
        tags: envelope.tags,
        generation: envelope.generation,
        state: envelope.state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keystore::backend::MemoryStore;
    use crate::provider::{PqCryptoProvider, ML_KEM_512};
    use chrono::Duration;

    fn levels(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn test_store() -> KeyStore {
        KeyStore::new(
            Arc::new(AlgorithmRegistry::new()),
            Arc::new(PqCryptoProvider::new()),
            StorePolicy::default(),
            CryptoConfig::default(),
            &SecretString::from("test passphrase"),
        )
        .unwrap()
    }

    #[test]
    fn test_store_retrieve_roundtrip() {
        let store = test_store();
        let public = store
            .generate_key("k1", ML_KEM_512, "", levels(&["admin"]), BTreeSet::new(), None)
            .unwrap();
        let material = store.retrieve_key("k1", "admin").unwrap();
        assert_eq!(material.public_key, public);
        assert!(!material.private_key.is_empty());

        let info = store.get_key_metadata("k1").unwrap();
        assert_eq!(info.generation, 0);
        assert_eq!(info.state, KeyState::Active);
        assert!(info.last_access.is_some());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();
        let err = store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap_err();
        assert!(matches!(err, Error::KeyAlreadyExists(_)));
    }

    #[test]
    fn test_access_control() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["signer"]), BTreeSet::new(), None)
            .unwrap();
        assert!(matches!(
            store.retrieve_key("k1", "auditor").unwrap_err(),
            Error::AccessDenied(_)
        ));

        store.add_key_access_level("k1", "auditor").unwrap();
        store.retrieve_key("k1", "auditor").unwrap();
        store.remove_key_access_level("k1", "auditor").unwrap();
        assert!(matches!(
            store.retrieve_key("k1", "auditor").unwrap_err(),
            Error::AccessDenied(_)
        ));
    }

    #[test]
    fn test_expiry_beats_access() {
        let store = test_store();
        store
            .generate_key(
                "k1",
                ML_KEM_512,
                "",
                levels(&["a"]),
                BTreeSet::new(),
                Some(Utc::now() - Duration::seconds(1)),
            )
            .unwrap();
        assert!(store.is_key_expired("k1").unwrap());
        // 访问级别匹配也不放行
        assert!(matches!(
            store.retrieve_key("k1", "a").unwrap_err(),
            Error::KeyExpired(_)
        ));
        // 惰性转移到 Expired 状态
        assert_eq!(store.get_key_metadata("k1").unwrap().state, KeyState::Expired);

        assert_eq!(store.cleanup_expired_keys().unwrap(), 1);
        assert_eq!(store.count_keys(), 0);
    }

    #[test]
    fn test_rotation_preserves_identity() {
        let store = test_store();
        store
            .generate_key(
                "k1",
                ML_KEM_512,
                "meta",
                levels(&["a", "b"]),
                levels(&["tag"]),
                None,
            )
            .unwrap();
        let before = store.retrieve_key("k1", "a").unwrap();

        let generation = store.rotate_key("k1").unwrap();
        assert_eq!(generation, 1);

        let info = store.get_key_metadata("k1").unwrap();
        assert_eq!(info.key_id, "k1");
        assert_eq!(info.access_levels, levels(&["a", "b"]));
        assert_eq!(info.tags, levels(&["tag"]));
        assert_eq!(info.state, KeyState::Active);

        let after = store.retrieve_key("k1", "a").unwrap();
        assert_ne!(before.public_key, after.public_key);
    }

    #[test]
    fn test_rotate_missing_key() {
        let store = test_store();
        assert!(matches!(
            store.rotate_key("absent").unwrap_err(),
            Error::KeyNotFound(_)
        ));
    }

    #[test]
    fn test_revoked_key_unusable_but_queryable() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();
        store.revoke_key("k1").unwrap();

        assert!(matches!(
            store.retrieve_key("k1", "a").unwrap_err(),
            Error::AccessDenied(_)
        ));
        assert!(matches!(
            store.rotate_key("k1").unwrap_err(),
            Error::AccessDenied(_)
        ));
        // 审计视图仍可用
        assert_eq!(store.get_key_metadata("k1").unwrap().state, KeyState::Revoked);
        store.delete_key("k1").unwrap();
    }

    #[test]
    fn test_validate_key() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();
        assert!(store.validate_key("k1").unwrap());
        assert!(matches!(
            store.validate_key("absent").unwrap_err(),
            Error::KeyNotFound(_)
        ));
    }

    #[test]
    fn test_master_rotation_and_reencrypt() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();

        let epoch = store.rotate_master(&SecretString::from("new passphrase")).unwrap();
        assert_eq!(epoch, 1);
        // 旧纪元封装仍可读
        store.retrieve_key("k1", "a").unwrap();

        store.reencrypt_key("k1").unwrap();
        store.retrieve_key("k1", "a").unwrap();
        // 幂等
        store.reencrypt_key("k1").unwrap();
    }

    #[test]
    fn test_backend_persistence_roundtrip() {
        let backend = Arc::new(MemoryStore::new());
        let registry = Arc::new(AlgorithmRegistry::new());
        let provider = Arc::new(PqCryptoProvider::new());
        let passphrase = SecretString::from("persisted");

        let store = KeyStore::with_backend(
            Arc::clone(&registry),
            Arc::clone(&provider) as Arc<dyn PqcProvider>,
            StorePolicy::default(),
            CryptoConfig::default(),
            &passphrase,
            Arc::clone(&backend) as Arc<dyn KeyValueStore>,
        )
        .unwrap();
        let public = store
            .generate_key("k1", ML_KEM_512, "m", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();
        drop(store);

        // 同一后端与口令恢复出相同记录
        let reopened = KeyStore::with_backend(
            registry,
            provider,
            StorePolicy::default(),
            CryptoConfig::default(),
            &passphrase,
            backend,
        )
        .unwrap();
        assert_eq!(reopened.count_keys(), 1);
        let material = reopened.retrieve_key("k1", "a").unwrap();
        assert_eq!(material.public_key, public);
    }

    #[test]
    fn test_update_key_fields() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "old", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();
        store
            .update_key("k1", "new", levels(&["b"]), levels(&["t"]))
            .unwrap();
        let info = store.get_key_metadata("k1").unwrap();
        assert_eq!(info.metadata, "new");
        assert_eq!(info.access_levels, levels(&["b"]));
        assert_eq!(info.tags, levels(&["t"]));
        // 密码学字段不变
        assert_eq!(info.generation, 0);
    }

    #[test]
    fn test_set_key_expiration() {
        let store = test_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();

        store
            .set_key_expiration("k1", Some(Utc::now() - Duration::seconds(1)))
            .unwrap();
        assert!(store.is_key_expired("k1").unwrap());
        assert!(matches!(
            store.retrieve_key("k1", "a").unwrap_err(),
            Error::KeyExpired(_)
        ));
        assert_eq!(store.get_key_metadata("k1").unwrap().state, KeyState::Expired);

        // 取消过期让记录重新可用
        store.set_key_expiration("k1", None).unwrap();
        assert!(!store.is_key_expired("k1").unwrap());
        assert_eq!(store.get_key_metadata("k1").unwrap().state, KeyState::Active);
        store.retrieve_key("k1", "a").unwrap();

        // 撤销后不再允许改期限
        store.revoke_key("k1").unwrap();
        assert!(matches!(
            store.set_key_expiration("k1", None).unwrap_err(),
            Error::AccessDenied(_)
        ));
    }

    /// 布防后在 generate_keypair 入口阻塞一次，撑开一个可控的轮换窗口
    struct BlockingProvider {
        inner: PqCryptoProvider,
        armed: std::sync::atomic::AtomicBool,
        enter: std::sync::Barrier,
        release: std::sync::Barrier,
    }

    impl BlockingProvider {
        fn new() -> Self {
            Self {
                inner: PqCryptoProvider::new(),
                armed: std::sync::atomic::AtomicBool::new(false),
                enter: std::sync::Barrier::new(2),
                release: std::sync::Barrier::new(2),
            }
        }

        fn arm(&self) {
            self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl PqcProvider for BlockingProvider {
        fn generate_keypair(
            &self,
            algorithm: &str,
        ) -> Result<(Vec<u8>, crate::common::utils::ZeroizingVec)> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.enter.wait();
                self.release.wait();
            }
            self.inner.generate_keypair(algorithm)
        }

        fn encapsulate(
            &self,
            algorithm: &str,
            public_key: &[u8],
        ) -> Result<(Vec<u8>, zeroize::Zeroizing<Vec<u8>>)> {
            self.inner.encapsulate(algorithm, public_key)
        }

        fn decapsulate(
            &self,
            algorithm: &str,
            ciphertext: &[u8],
            secret_key: &[u8],
        ) -> Result<zeroize::Zeroizing<Vec<u8>>> {
            self.inner.decapsulate(algorithm, ciphertext, secret_key)
        }

        fn sign(&self, algorithm: &str, message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
            self.inner.sign(algorithm, message, secret_key)
        }

        fn verify(
            &self,
            algorithm: &str,
            message: &[u8],
            signature: &[u8],
            public_key: &[u8],
        ) -> Result<()> {
            self.inner.verify(algorithm, message, signature, public_key)
        }
    }

    fn blocking_store() -> (Arc<KeyStore>, Arc<BlockingProvider>) {
        let provider = Arc::new(BlockingProvider::new());
        let store = KeyStore::new(
            Arc::new(AlgorithmRegistry::new()),
            Arc::clone(&provider) as Arc<dyn PqcProvider>,
            StorePolicy::default(),
            CryptoConfig::default(),
            &SecretString::from("test passphrase"),
        )
        .unwrap();
        (Arc::new(store), provider)
    }

    #[test]
    fn test_revocation_not_clobbered_by_rotation() {
        let (store, provider) = blocking_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();

        provider.arm();
        let rotation = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.rotate_key("k1"))
        };
        provider.enter.wait();

        // 轮换窗口内的修改被拒绝，而不是先落地再被换入覆盖
        assert!(matches!(
            store.revoke_key("k1").unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            store
                .update_key("k1", "m", levels(&["a"]), BTreeSet::new())
                .unwrap_err(),
            Error::InvalidArgument(_)
        ));

        provider.release.wait();
        assert_eq!(rotation.join().unwrap().unwrap(), 1);

        // 轮换结束后撤销落地并保持终态
        store.revoke_key("k1").unwrap();
        assert_eq!(store.get_key_metadata("k1").unwrap().state, KeyState::Revoked);
        assert!(matches!(
            store.retrieve_key("k1", "a").unwrap_err(),
            Error::AccessDenied(_)
        ));
    }

    #[test]
    fn test_deletion_survives_concurrent_rotation() {
        let (store, provider) = blocking_store();
        store
            .generate_key("k1", ML_KEM_512, "", levels(&["a"]), BTreeSet::new(), None)
            .unwrap();

        provider.arm();
        let rotation = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || store.rotate_key("k1"))
        };
        provider.enter.wait();
        store.delete_key("k1").unwrap();
        provider.release.wait();

        // 轮换不复活已删除的记录
        assert!(matches!(
            rotation.join().unwrap().unwrap_err(),
            Error::KeyNotFound(_)
        ));
        assert!(matches!(
            store.get_key_metadata("k1").unwrap_err(),
            Error::KeyNotFound(_)
        ));
        assert_eq!(store.count_keys(), 0);
    }
}
