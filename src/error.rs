//! 统一的错误类型定义。
//!
//! 所有公开操作都返回稳定的错误种类；内部库（pqcrypto、AEAD、KDF）的
//! 失败会被映射到这里的分类，而不会原样泄漏给调用方。
//! `DecryptionFailed` 与 `SignatureInvalid` 刻意不携带任何细节，
//! 以避免成为格式或填充信息的预言机。

use thiserror::Error;

/// 加密核心可能遇到的错误类型
#[derive(Error, Debug)]
pub enum Error {
    #[error("subsystem not initialized")]
    NotInitialized,

    #[error("subsystem already initialized")]
    AlreadyInitialized,

    #[error("unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("key not found with id: {0}")]
    KeyNotFound(String),

    #[error("key already exists with id: {0}")]
    KeyAlreadyExists(String),

    #[error("key expired: {0}")]
    KeyExpired(String),

    #[error("access denied for key: {0}")]
    AccessDenied(String),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("no active session")]
    NoActiveSession,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("allocation failed")]
    AllocationFailed,

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid base64 data")]
    Base64(#[from] base64::DecodeError),
}

/// 本 crate 统一的 Result 别名
pub type Result<T> = std::result::Result<T, Error>;
