//!
//! # 密钥记录
//!
//! 记录以 `Arc<KeyRecord>` 形式放入并发映射，任何修改都通过
//! 复制写入新记录并整体替换完成，读者看到的永远是完整的一代。
//!

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::utils::ZeroizingVec;
use crate::keystore::container::EncryptedMaterial;

/// 密钥生命周期状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyState {
    Active,
    /// 轮换进行中，材料仍是上一代，可正常取用
    Rotating,
    Expired,
    /// 终态，只能删除
    Revoked,
}

/// 明文形态的密钥材料，仅在单次操作的作用域内存在
pub struct KeyMaterial {
    pub public_key: Vec<u8>,
    pub private_key: ZeroizingVec,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 不输出私钥字节
        f.debug_struct("KeyMaterial")
            .field("public_key_len", &self.public_key.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// 静态存储形态：公钥明文，私钥封装
#[derive(Clone, Debug)]
pub struct KeyMaterialAtRest {
    pub public_key: Vec<u8>,
    pub wrapped_private: EncryptedMaterial,
}

/// 单个受管密钥的完整记录
#[derive(Debug)]
pub struct KeyRecord {
    pub key_id: String,
    pub algorithm: String,
    pub material: KeyMaterialAtRest,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// 最近一次成功取用的 Unix 时间戳（秒），0 表示从未取用
    pub last_access: AtomicI64,
    pub access_levels: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    /// 轮换纪元，只增不减
    pub generation: u64,
    pub state: KeyState,
}

impl KeyRecord {
    /// 复制记录（含 last_access 当前值），作为修改的基底
    pub(crate) fn duplicate(&self) -> KeyRecord {
        KeyRecord {
            key_id: self.key_id.clone(),
            algorithm: self.algorithm.clone(),
            material: self.material.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_access: AtomicI64::new(self.last_access.load(Ordering::Relaxed)),
            access_levels: self.access_levels.clone(),
            tags: self.tags.clone(),
            generation: self.generation,
            state: self.state,
        }
    }

    pub(crate) fn with_state(&self, state: KeyState) -> KeyRecord {
        let mut record = self.duplicate();
        record.state = state;
        record
    }

    /// 记录一次成功取用
    pub(crate) fn touch(&self) {
        self.last_access
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub(crate) fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| now > e).unwrap_or(false)
    }

    /// 公开元数据快照，不含任何密钥材料
    pub fn info(&self) -> KeyInfo {
        let last_access = match self.last_access.load(Ordering::Relaxed) {
            0 => None,
            ts => DateTime::from_timestamp(ts, 0),
        };
        KeyInfo {
            key_id: self.key_id.clone(),
            algorithm: self.algorithm.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_access,
            access_levels: self.access_levels.clone(),
            tags: self.tags.clone(),
            generation: self.generation,
            state: self.state,
        }
    }
}

/// 对外的元数据视图
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub key_id: String,
    pub algorithm: String,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_access: Option<DateTime<Utc>>,
    pub access_levels: BTreeSet<String>,
    pub tags: BTreeSet<String>,
    pub generation: u64,
    pub state: KeyState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_material_debug_redacts_private_key() {
        let material = KeyMaterial {
            public_key: vec![0x01, 0x02, 0x03],
            private_key: ZeroizingVec::new(vec![0xAA; 16]),
        };
        let rendered = format!("{material:?}");
        assert!(rendered.contains("public_key_len: 3"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("170"));
        assert!(!rendered.contains("0xAA"));
    }
}
