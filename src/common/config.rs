//!
//! # 通用配置模块
//!
//! 定义加密参数、密钥库策略与会话策略。
//! 所有结构都支持 serde，缺省字段取 `Default`，便于从外部配置文件加载。
//!
use serde::{Deserialize, Serialize};

/// 数据加密使用的 AEAD 算法
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum AeadAlgorithm {
    /// AES-256-GCM（默认）
    Aes256Gcm,
    /// ChaCha20-Poly1305
    ChaCha20Poly1305,
}

impl Default for AeadAlgorithm {
    fn default() -> Self {
        AeadAlgorithm::Aes256Gcm
    }
}

impl AeadAlgorithm {
    /// 线格式中的单字节标识
    pub fn wire_id(self) -> u8 {
        match self {
            AeadAlgorithm::Aes256Gcm => 1,
            AeadAlgorithm::ChaCha20Poly1305 => 2,
        }
    }

    pub fn from_wire_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(AeadAlgorithm::Aes256Gcm),
            2 => Some(AeadAlgorithm::ChaCha20Poly1305),
            _ => None,
        }
    }
}

/// 加密配置
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CryptoConfig {
    /// 初始默认算法（注册表的 default 指针由此初始化）
    pub default_algorithm: String,
    /// 数据加密使用的 AEAD 算法
    #[serde(default)]
    pub aead: AeadAlgorithm,
    /// Argon2id 内存开销（KiB），用于派生密钥库主密钥
    #[serde(default = "default_memory_cost")]
    pub argon2_memory_cost: u32,
    /// Argon2id 迭代次数
    #[serde(default = "default_time_cost")]
    pub argon2_time_cost: u32,
    /// Argon2id 并行度
    #[serde(default = "default_parallelism_cost")]
    pub argon2_parallelism: u32,
}

fn default_memory_cost() -> u32 {
    19456 // 19 MiB
}
fn default_time_cost() -> u32 {
    2
}
fn default_parallelism_cost() -> u32 {
    1
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            default_algorithm: crate::provider::ML_KEM_768.to_string(),
            aead: AeadAlgorithm::default(),
            argon2_memory_cost: default_memory_cost(),
            argon2_time_cost: default_time_cost(),
            argon2_parallelism: default_parallelism_cost(),
        }
    }
}

/// 密钥库策略
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StorePolicy {
    /// 是否强制访问级别检查
    pub enforce_access_control: bool,
    /// 调用方元数据的最大长度（字节）
    pub max_metadata_bytes: usize,
    /// key_id 的最大长度
    pub max_key_id_length: usize,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            enforce_access_control: true,
            max_metadata_bytes: 1024, // 1 KiB
            max_key_id_length: 128,
        }
    }
}

/// 会话密钥策略
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SessionPolicy {
    /// 会话密钥有效期（秒）
    pub validity_secs: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            validity_secs: 3600,
        }
    }
}

/// 完整配置文件，代表安全管理器的所有可配置项。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct ConfigFile {
    /// 加密配置
    #[serde(default)]
    pub crypto: CryptoConfig,
    /// 密钥库策略
    #[serde(default)]
    pub store: StorePolicy,
    /// 会话策略
    #[serde(default)]
    pub session: SessionPolicy,
}
